//! Capture devices feeding a `FrameSource`
//!
//! A device is owned by exactly one frame-source loop. The loop opens it,
//! reads until a read fails, then releases it and reopens with backoff.

use crate::infra::config::CameraConfig;
use crate::io::http_auth::AuthUrl;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[async_trait]
pub trait CaptureDevice: Send {
    /// Source name for logs
    fn describe(&self) -> String;

    async fn open(&mut self) -> anyhow::Result<()>;

    /// Read the next frame. Only called after a successful `open`.
    async fn read(&mut self) -> anyhow::Result<Bytes>;

    fn release(&mut self);
}

/// Camera exposing a still-image snapshot URL, polled at a fixed rate
pub struct HttpSnapshotDevice {
    target: AuthUrl,
    timeout: Duration,
    frame_interval: Duration,
    client: Option<reqwest::Client>,
    next_read: Option<Instant>,
}

impl HttpSnapshotDevice {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            target: AuthUrl::parse(&config.url),
            timeout: Duration::from_millis(config.timeout_ms),
            frame_interval: Duration::from_secs(1) / config.fps.max(1),
            client: None,
            next_read: None,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    async fn fetch(&self, client: &reqwest::Client) -> anyhow::Result<Bytes> {
        let request = self.target.apply(client.get(&self.target.url).header("Accept", "image/*"));
        let response = request.send().await.context("snapshot request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("snapshot returned HTTP {}", status.as_u16());
        }
        let body = response.bytes().await.context("snapshot body read failed")?;
        if body.is_empty() {
            bail!("snapshot body is empty");
        }
        Ok(body)
    }
}

#[async_trait]
impl CaptureDevice for HttpSnapshotDevice {
    fn describe(&self) -> String {
        self.target.url.clone()
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build camera HTTP client")?;
        // Probe once so an unreachable camera counts as an open failure
        self.fetch(&client).await?;
        self.client = Some(client);
        self.next_read = None;
        Ok(())
    }

    async fn read(&mut self) -> anyhow::Result<Bytes> {
        if let Some(deadline) = self.next_read {
            tokio::time::sleep_until(deadline).await;
        }
        self.next_read = Some(Instant::now() + self.frame_interval);

        let client = self.client.as_ref().ok_or_else(|| anyhow!("device not open"))?;
        let frame = self.fetch(client).await?;
        debug!(bytes = %frame.len(), "snapshot_read");
        Ok(frame)
    }

    fn release(&mut self) {
        self.client = None;
        self.next_read = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(url: &str, fps: u32) -> CameraConfig {
        CameraConfig { url: url.to_string(), fps, timeout_ms: 200 }
    }

    #[test]
    fn test_frame_interval_from_fps() {
        let device = HttpSnapshotDevice::new(&camera("http://cam/snap.jpg", 4));
        assert_eq!(device.frame_interval(), Duration::from_millis(250));

        let zero = HttpSnapshotDevice::new(&camera("http://cam/snap.jpg", 0));
        assert_eq!(zero.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_describe_hides_credentials() {
        let device = HttpSnapshotDevice::new(&camera("http://user:pw@cam/snap.jpg", 10));
        assert_eq!(device.describe(), "http://cam/snap.jpg");
    }

    #[tokio::test]
    async fn test_read_before_open_fails() {
        let mut device = HttpSnapshotDevice::new(&camera("http://127.0.0.1:9/snap.jpg", 10));
        assert!(device.read().await.is_err());
    }

    #[tokio::test]
    async fn test_open_unreachable_fails() {
        let mut device = HttpSnapshotDevice::new(&camera("http://127.0.0.1:9/snap.jpg", 10));
        assert!(device.open().await.is_err());
    }
}
