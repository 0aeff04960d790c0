//! Detector collaborators
//!
//! Plate recognition and motion-blob extraction run outside this process.
//! The HTTP adapters post the encoded frame and read a small JSON answer:
//!
//! - plate endpoint: `{"plate": "AB1234" | null, "confidence": 0.87}`
//! - motion endpoint: `{"centroid": [x, y] | null}`

use crate::domain::types::{Frame, Point};
use crate::domain::whitelist::normalize_plate;
use anyhow::{bail, Context};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

/// One plate recognition result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlateReading {
    /// Normalized plate text, `None` when nothing was read
    pub identity: Option<String>,
    pub confidence: f32,
    /// Text matches the expected plate format
    pub valid: bool,
}

impl PlateReading {
    pub fn none() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait PlateRecognizer: Send {
    async fn recognize(&mut self, frame: &Frame) -> anyhow::Result<PlateReading>;
}

#[async_trait]
pub trait MotionDetector: Send {
    /// Centroid of the dominant moving object, if any
    async fn centroid(&mut self, frame: &Frame) -> anyhow::Result<Option<Point>>;
}

/// Expected plate text format
#[derive(Debug, Clone)]
pub struct PlateFormat {
    pattern: Regex,
}

impl PlateFormat {
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("invalid plate regex {pattern:?}"))?;
        Ok(Self { pattern })
    }

    /// Normalize raw recognizer text into a reading
    pub fn reading(&self, raw: Option<&str>, confidence: f32) -> PlateReading {
        let identity = raw.map(normalize_plate).filter(|text| !text.is_empty());
        let valid = identity.as_deref().is_some_and(|text| self.pattern.is_match(text));
        PlateReading { identity, confidence: confidence.clamp(0.0, 1.0), valid }
    }
}

#[derive(Debug, Deserialize)]
struct PlateResponse {
    #[serde(default)]
    plate: Option<String>,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
struct MotionResponse {
    #[serde(default)]
    centroid: Option<[f64; 2]>,
}

fn detection_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build detector HTTP client")
}

async fn post_frame<T: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    url: &str,
    frame: &Frame,
) -> anyhow::Result<T> {
    let response = client
        .post(url)
        .header("Content-Type", "application/octet-stream")
        .body(frame.data.clone())
        .send()
        .await
        .with_context(|| format!("detector request to {url} failed"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("detector {url} returned HTTP {}", status.as_u16());
    }
    let body = response.bytes().await.context("detector body read failed")?;
    serde_json::from_slice(&body).context("detector returned malformed JSON")
}

pub struct HttpPlateRecognizer {
    client: reqwest::Client,
    url: String,
    format: PlateFormat,
}

impl HttpPlateRecognizer {
    pub fn new(url: &str, timeout: Duration, format: PlateFormat) -> anyhow::Result<Self> {
        Ok(Self { client: detection_client(timeout)?, url: url.to_string(), format })
    }
}

#[async_trait]
impl PlateRecognizer for HttpPlateRecognizer {
    async fn recognize(&mut self, frame: &Frame) -> anyhow::Result<PlateReading> {
        let answer: PlateResponse = post_frame(&self.client, &self.url, frame).await?;
        Ok(self.format.reading(answer.plate.as_deref(), answer.confidence))
    }
}

pub struct HttpMotionDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpMotionDetector {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { client: detection_client(timeout)?, url: url.to_string() })
    }
}

#[async_trait]
impl MotionDetector for HttpMotionDetector {
    async fn centroid(&mut self, frame: &Frame) -> anyhow::Result<Option<Point>> {
        let answer: MotionResponse = post_frame(&self.client, &self.url, frame).await?;
        Ok(answer.centroid.map(Point::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> PlateFormat {
        PlateFormat::new("^[A-Z0-9]{4,8}$").unwrap()
    }

    #[test]
    fn test_reading_normalizes_and_validates() {
        let reading = format().reading(Some("ab 1234"), 0.8);
        assert_eq!(reading.identity.as_deref(), Some("AB1234"));
        assert!(reading.valid);
    }

    #[test]
    fn test_reading_invalid_format() {
        let reading = format().reading(Some("A-1"), 0.9);
        assert_eq!(reading.identity.as_deref(), Some("A-1"));
        assert!(!reading.valid);
    }

    #[test]
    fn test_reading_empty_text() {
        let reading = format().reading(Some("   "), 0.9);
        assert_eq!(reading.identity, None);
        assert!(!reading.valid);

        assert_eq!(format().reading(None, 0.0), PlateReading::none());
    }

    #[test]
    fn test_confidence_clamped() {
        assert!((format().reading(Some("AB1234"), 1.7).confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_bad_regex_rejected() {
        assert!(PlateFormat::new("([A-Z").is_err());
    }

    #[test]
    fn test_response_parsing() {
        let plate: PlateResponse =
            serde_json::from_str(r#"{"plate": "WX55ABC", "confidence": 0.66}"#).unwrap();
        assert_eq!(plate.plate.as_deref(), Some("WX55ABC"));

        let empty: PlateResponse = serde_json::from_str(r#"{"plate": null}"#).unwrap();
        assert!(empty.plate.is_none());

        let motion: MotionResponse = serde_json::from_str(r#"{"centroid": [320, 240.5]}"#).unwrap();
        assert_eq!(motion.centroid, Some([320.0, 240.5]));
    }
}
