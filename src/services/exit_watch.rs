//! Exit camera loop - ordered zone crossing to open requests
//!
//! The motion detector reports the centroid of the dominant moving object.
//! Recent centroids form a short track used for the speed gate; the zone
//! sequencer decides whether the object went from zone A to zone B in time.

use crate::domain::types::{Frame, Origin, Point};
use crate::domain::zones::ZoneSequencer;
use crate::infra::metrics::Metrics;
use crate::io::detectors::MotionDetector;
use crate::io::event_log::EventLog;
use crate::services::frame_source::FrameReader;
use crate::services::gate::GateController;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Centroids kept for the speed estimate
const TRACK_LEN: usize = 10;

pub struct ExitWatch {
    frames: FrameReader,
    detector: Box<dyn MotionDetector>,
    sequencer: ZoneSequencer,
    /// Minimum first-to-last track speed, 0 disables the check
    min_speed_px_per_s: f64,
    track: VecDeque<(Instant, Point)>,
    gate: Arc<GateController>,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
}

impl ExitWatch {
    pub fn new(
        frames: FrameReader,
        detector: Box<dyn MotionDetector>,
        sequencer: ZoneSequencer,
        min_speed_px_per_s: f64,
        gate: Arc<GateController>,
        events: Arc<EventLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            frames,
            detector,
            sequencer,
            min_speed_px_per_s,
            track: VecDeque::with_capacity(TRACK_LEN),
            gate,
            events,
            metrics,
        }
    }

    /// Pixels per second between the oldest and newest tracked centroid
    pub fn track_speed(&self) -> Option<f64> {
        let (t0, p0) = self.track.front()?;
        let (t1, p1) = self.track.back()?;
        if self.track.len() < 2 {
            return None;
        }
        let dt = t1.saturating_duration_since(*t0).as_secs_f64().max(1e-3);
        Some(p0.distance(p1) / dt)
    }

    pub fn track_len(&self) -> usize {
        self.track.len()
    }

    fn speed_ok(&self, speed: Option<f64>) -> bool {
        self.min_speed_px_per_s <= 0.0 || speed.map_or(true, |v| v >= self.min_speed_px_per_s)
    }

    /// Handle one new frame. Returns true when the gate accepted an open.
    pub async fn process(&mut self, frame: &Frame) -> bool {
        let centroid = match self.detector.centroid(frame).await {
            Ok(centroid) => centroid,
            Err(e) => {
                warn!(seq = %frame.seq, error = %format!("{e:#}"), "motion_detection_failed");
                None
            }
        };

        let Some(point) = centroid else {
            self.track.clear();
            return false;
        };

        if self.track.len() == TRACK_LEN {
            self.track.pop_front();
        }
        self.track.push_back((frame.captured_at, point));

        let speed = self.track_speed();
        let update = self.sequencer.update(point, frame.captured_at);
        if !update.triggered {
            return false;
        }

        self.metrics.record_motion_trigger();
        if !self.speed_ok(speed) {
            debug!(
                speed_px_per_s = ?speed,
                min_speed_px_per_s = %self.min_speed_px_per_s,
                "exit_too_slow"
            );
            return false;
        }

        let reason = match speed {
            Some(v) => format!("MOTION A->B speed={v:.0}px/s"),
            None => "MOTION A->B".to_string(),
        };
        let accepted = self.gate.request_open(Origin::Out, &reason).await;
        if accepted {
            self.events.log(
                "open_by_out",
                json!({"x": point.x, "y": point.y, "speed": speed}),
            );
        }
        accepted
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.frames.name(),
            max_delay_ms = %self.sequencer.max_delay().as_millis(),
            min_speed_px_per_s = %self.min_speed_px_per_s,
            "exit_watch_started"
        );

        let mut seen = 0;
        while let Some(frame) = self.frames.next_after(seen, &mut shutdown).await {
            seen = frame.seq;
            self.process(&frame).await;
        }

        info!("exit_watch_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::zones::Polygon;
    use crate::io::limit_switch::LimitSwitches;
    use crate::io::relay::LogRelay;
    use crate::services::gate::GateTimings;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Detector replaying a fixed list of answers, then reporting nothing
    struct ScriptedDetector {
        answers: VecDeque<anyhow::Result<Option<Point>>>,
    }

    #[async_trait]
    impl MotionDetector for ScriptedDetector {
        async fn centroid(&mut self, _frame: &Frame) -> anyhow::Result<Option<Point>> {
            self.answers.pop_front().unwrap_or(Ok(None))
        }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        Polygon::from(vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]])
    }

    fn at(x: f64, y: f64) -> anyhow::Result<Option<Point>> {
        Ok(Some(Point::new(x, y)))
    }

    struct Harness {
        watch: ExitWatch,
        metrics: Arc<Metrics>,
        base: Instant,
        seq: u64,
    }

    impl Harness {
        fn new(answers: Vec<anyhow::Result<Option<Point>>>, min_speed: f64, events: EventLog) -> Self {
            let metrics = Arc::new(Metrics::new());
            let events = Arc::new(events);
            let gate = Arc::new(GateController::new(
                GateTimings::default(),
                Arc::new(LogRelay::new()),
                LimitSwitches::none(),
                events.clone(),
                metrics.clone(),
            ));
            // A on the left, B on the right
            let sequencer = ZoneSequencer::new(
                rect(0.0, 0.0, 100.0, 100.0),
                rect(200.0, 0.0, 300.0, 100.0),
                Duration::from_secs(4),
            );
            let watch = ExitWatch::new(
                FrameReader::empty("out"),
                Box::new(ScriptedDetector { answers: answers.into() }),
                sequencer,
                min_speed,
                gate,
                events,
                metrics.clone(),
            );
            Self { watch, metrics, base: Instant::now(), seq: 0 }
        }

        async fn feed(&mut self, at_ms: u64) -> bool {
            self.seq += 1;
            let frame = Frame {
                data: Bytes::from_static(b"jpeg"),
                captured_at: self.base + Duration::from_millis(at_ms),
                seq: self.seq,
            };
            self.watch.process(&frame).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_a_then_b_opens_gate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut h = Harness::new(
            vec![at(50.0, 50.0), at(150.0, 50.0), at(250.0, 50.0)],
            0.0,
            EventLog::new(&path),
        );

        assert!(!h.feed(0).await);
        assert!(!h.feed(500).await);
        assert!(h.feed(1000).await);

        let summary = h.metrics.report();
        assert_eq!(summary.motion_triggers, 1);
        assert_eq!(summary.requests_out, 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"kind\":\"open_by_out\""));
        assert!(content.contains("MOTION A->B speed=200px/s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_b_without_a_does_not_open() {
        let mut h = Harness::new(vec![at(250.0, 50.0), at(260.0, 50.0)], 0.0, EventLog::disabled());
        assert!(!h.feed(0).await);
        assert!(!h.feed(100).await);
        assert_eq!(h.metrics.report().motion_triggers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_crossing_is_filtered() {
        // 200px in 1s is below the 500px/s floor
        let mut h = Harness::new(vec![at(50.0, 50.0), at(250.0, 50.0)], 500.0, EventLog::disabled());
        assert!(!h.feed(0).await);
        assert!(!h.feed(1000).await);

        let summary = h.metrics.report();
        assert_eq!(summary.motion_triggers, 1);
        assert_eq!(summary.requests_accepted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_crossing_passes_speed_gate() {
        let mut h = Harness::new(vec![at(50.0, 50.0), at(250.0, 50.0)], 100.0, EventLog::disabled());
        assert!(!h.feed(0).await);
        assert!(h.feed(1000).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_object_clears_track() {
        let mut h = Harness::new(
            vec![at(50.0, 50.0), at(60.0, 50.0), Ok(None), Err(anyhow!("detector timeout"))],
            0.0,
            EventLog::disabled(),
        );
        h.feed(0).await;
        h.feed(100).await;
        assert_eq!(h.watch.track_len(), 2);
        assert!((h.watch.track_speed().unwrap() - 100.0).abs() < 1e-6);

        h.feed(200).await;
        assert_eq!(h.watch.track_len(), 0);
        assert!(h.watch.track_speed().is_none());

        h.feed(300).await;
        assert_eq!(h.watch.track_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_is_bounded() {
        let answers = (0..25).map(|i| at(10.0 + i as f64, 50.0)).collect();
        let mut h = Harness::new(answers, 0.0, EventLog::disabled());
        for i in 0..25 {
            h.feed(i * 100).await;
        }
        assert_eq!(h.watch.track_len(), TRACK_LEN);
    }
}
