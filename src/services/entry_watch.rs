//! Entry camera loop - plate recognition to open requests
//!
//! The recognizer is expensive, so it only runs on every
//! `recognize_every`-th frame and its answer is reused for the frames in
//! between. The trigger policy is still evaluated on every frame with that
//! frame's capture time, which keeps the last-seen time of a plate that stays
//! in view fresh.

use crate::domain::entry_policy::{Candidate, EntryTriggerPolicy};
use crate::domain::types::{Frame, Origin};
use crate::domain::whitelist::Whitelist;
use crate::infra::metrics::Metrics;
use crate::io::detectors::{PlateReading, PlateRecognizer};
use crate::io::event_log::EventLog;
use crate::services::frame_source::FrameReader;
use crate::services::gate::GateController;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct EntryWatch {
    frames: FrameReader,
    recognizer: Box<dyn PlateRecognizer>,
    whitelist: Arc<Whitelist>,
    policy: EntryTriggerPolicy,
    gate: Arc<GateController>,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
    recognize_every: u64,
    frame_counter: u64,
    /// Last recognizer answer, reused until the next recognition
    current: PlateReading,
}

impl EntryWatch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frames: FrameReader,
        recognizer: Box<dyn PlateRecognizer>,
        whitelist: Arc<Whitelist>,
        policy: EntryTriggerPolicy,
        recognize_every: u32,
        gate: Arc<GateController>,
        events: Arc<EventLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            frames,
            recognizer,
            whitelist,
            policy,
            gate,
            events,
            metrics,
            recognize_every: u64::from(recognize_every.max(1)),
            frame_counter: 0,
            current: PlateReading::none(),
        }
    }

    /// Handle one new frame. Returns true when the gate accepted an open.
    pub async fn process(&mut self, frame: &Frame) -> bool {
        self.frame_counter += 1;
        if self.frame_counter % self.recognize_every == 0 {
            self.current = match self.recognizer.recognize(frame).await {
                Ok(reading) => {
                    if let Some(ref plate) = reading.identity {
                        self.metrics.record_plate_reading();
                        debug!(
                            plate = %plate,
                            confidence = %reading.confidence,
                            valid = %reading.valid,
                            "plate_read"
                        );
                    }
                    reading
                }
                Err(e) => {
                    warn!(seq = %frame.seq, error = %format!("{e:#}"), "plate_recognition_failed");
                    PlateReading::none()
                }
            };
        }

        let Some(plate) = self.current.identity.clone() else {
            return false;
        };
        let confidence = self.current.confidence;
        let valid = self.current.valid;
        let candidate = Candidate {
            identity: &plate,
            confidence,
            valid,
            whitelisted: valid && self.whitelist.contains(&plate),
        };

        if !self.policy.evaluate(candidate, frame.captured_at) {
            return false;
        }

        let reason = format!("ANPR {plate} conf={confidence:.2}");
        let accepted = self.gate.request_open(Origin::In, &reason).await;
        if accepted {
            self.policy.record_open(&plate, frame.captured_at);
            self.events.log("open_by_in", json!({"plate": plate, "conf": confidence}));
        }
        accepted
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.frames.name(),
            recognize_every = %self.recognize_every,
            whitelist = %self.whitelist.len(),
            "entry_watch_started"
        );

        let mut seen = 0;
        while let Some(frame) = self.frames.next_after(seen, &mut shutdown).await {
            seen = frame.seq;
            self.process(&frame).await;
        }

        info!("entry_watch_stopped");
    }
}
