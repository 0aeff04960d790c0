//! Shared types for the gate controller

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Logical sensor path that issued an open request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Entry path (plate recognition)
    In,
    /// Exit path (motion sequence)
    Out,
    /// Operator request through the HTTP endpoint
    Manual,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::In => "in",
            Origin::Out => "out",
            Origin::Manual => "manual",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate position as tracked by the cycle tracker.
///
/// Transitions are strictly `Closed -> Opening -> Open -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Closed => "CLOSED",
            GateState::Opening => "OPENING",
            GateState::Open => "OPEN",
            GateState::Closing => "CLOSING",
        }
    }

    /// The only state reachable from `self`
    pub fn next(&self) -> GateState {
        match self {
            GateState::Closed => GateState::Opening,
            GateState::Opening => GateState::Open,
            GateState::Open => GateState::Closing,
            GateState::Closing => GateState::Closed,
        }
    }

    /// Numeric value for the metrics gauge
    pub fn as_gauge(&self) -> u64 {
        match self {
            GateState::Closed => 0,
            GateState::Opening => 1,
            GateState::Open => 2,
            GateState::Closing => 3,
        }
    }

    pub fn from_gauge(value: u64) -> GateState {
        match value {
            1 => GateState::Opening,
            2 => GateState::Open,
            3 => GateState::Closing,
            _ => GateState::Closed,
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Door position reported by the RS485 door controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorStatus {
    Closed,
    Moving,
    Open,
    Unknown,
}

impl DoorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorStatus::Closed => "closed",
            DoorStatus::Moving => "moving",
            DoorStatus::Open => "open",
            DoorStatus::Unknown => "unknown",
        }
    }
}

/// Image-space coordinate in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<[f64; 2]> for Point {
    fn from(p: [f64; 2]) -> Self {
        Self { x: p[0], y: p[1] }
    }
}

/// One captured frame.
///
/// `data` is immutable shared storage, so a reader holding a frame can never
/// observe or cause changes to the copy held by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image as delivered by the capture device
    pub data: Bytes,
    /// Monotonic capture time
    pub captured_at: Instant,
    /// Per-source sequence number, starting at 1
    pub seq: u64,
}
