//! Two-zone ordered crossing detection for the exit path
//!
//! An exiting vehicle must be seen in zone A and then in zone B within
//! `max_delay`. Only the most recent A sighting counts; a B sighting without
//! a live A sighting never triggers.

use crate::domain::types::Point;
use smallvec::SmallVec;
use std::time::{Duration, Instant};
use tracing::debug;

/// Tolerance for the on-edge test (pixels)
const EDGE_EPSILON: f64 = 1e-9;

/// Closed polygon in image coordinates. Edges count as inside.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: SmallVec<[Point; 8]>,
}

impl Polygon {
    pub fn new(vertices: impl IntoIterator<Item = Point>) -> Self {
        Self { vertices: vertices.into_iter().collect() }
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Point-in-polygon test, boundary inclusive
    pub fn contains(&self, p: Point) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[j];

            if on_segment(p, a, b) {
                return true;
            }

            // Ray cast towards +x
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

impl From<Vec<[f64; 2]>> for Polygon {
    fn from(points: Vec<[f64; 2]>) -> Self {
        Self::new(points.into_iter().map(Point::from))
    }
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EDGE_EPSILON * (1.0 + a.distance(&b)) {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

/// Result of feeding one centroid to the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneUpdate {
    pub triggered: bool,
    pub in_a: bool,
    pub in_b: bool,
}

/// Decides whether a tracked object crossed zone A then zone B in time
pub struct ZoneSequencer {
    zone_a: Polygon,
    zone_b: Polygon,
    max_delay: Duration,
    /// When the centroid was last seen in zone A
    entered_a: Option<Instant>,
}

impl ZoneSequencer {
    pub fn new(zone_a: Polygon, zone_b: Polygon, max_delay: Duration) -> Self {
        Self { zone_a, zone_b, max_delay, entered_a: None }
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Time of the live A sighting, if any
    pub fn entered_a(&self) -> Option<Instant> {
        self.entered_a
    }

    /// Feed one centroid observed at `now`
    pub fn update(&mut self, point: Point, now: Instant) -> ZoneUpdate {
        let in_a = self.zone_a.contains(point);
        let in_b = self.zone_b.contains(point);

        // An A sighting from before this call that is still within the window.
        // A point in both zones refreshes A but cannot also be its own prior sighting.
        let prior_a = self.entered_a.filter(|t| now.saturating_duration_since(*t) <= self.max_delay);

        if in_a {
            self.entered_a = Some(now);
        }

        let mut triggered = false;
        if in_b {
            if let Some(t_a) = prior_a {
                triggered = true;
                self.entered_a = None;
                debug!(
                    delay_ms = %now.saturating_duration_since(t_a).as_millis(),
                    "zone_sequence_triggered"
                );
            }
        }

        if let Some(t_a) = self.entered_a {
            if now.saturating_duration_since(t_a) > self.max_delay {
                debug!("zone_sequence_expired");
                self.entered_a = None;
            }
        }

        ZoneUpdate { triggered, in_a, in_b }
    }
}
