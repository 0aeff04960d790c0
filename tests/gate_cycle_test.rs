//! End-to-end: frames from a capture device drive the entry loop, which opens
//! the gate through a full cycle

use anpr_gate::domain::types::{Frame, GateState};
use anpr_gate::domain::{EntryTriggerPolicy, Whitelist};
use anpr_gate::infra::Metrics;
use anpr_gate::io::{
    Actuator, CaptureDevice, EventLog, LimitSwitches, PlateReading, PlateRecognizer,
};
use anpr_gate::services::{EntryWatch, FrameSource, GateController, GateTimings};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Camera that delivers a frame every 100ms
struct SteadyCamera;

#[async_trait]
impl CaptureDevice for SteadyCamera {
    fn describe(&self) -> String {
        "steady".to_string()
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn read(&mut self) -> anyhow::Result<Bytes> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Bytes::from_static(b"frame"))
    }

    fn release(&mut self) {}
}

/// Recognizer that always sees the same plate
struct FixedPlate(&'static str);

#[async_trait]
impl PlateRecognizer for FixedPlate {
    async fn recognize(&mut self, _frame: &Frame) -> anyhow::Result<PlateReading> {
        Ok(PlateReading { identity: Some(self.0.to_string()), confidence: 0.9, valid: true })
    }
}

#[derive(Default)]
struct CountingRelay {
    pulses: AtomicUsize,
}

#[async_trait]
impl Actuator for CountingRelay {
    async fn on(&self) {
        self.pulses.fetch_add(1, Ordering::SeqCst);
    }

    async fn off(&self) {}
}

#[tokio::test(start_paused = true)]
async fn test_parked_whitelisted_car_opens_gate_once() {
    let metrics = Arc::new(Metrics::new());
    let events = Arc::new(EventLog::disabled());
    let relay = Arc::new(CountingRelay::default());
    let gate = Arc::new(GateController::new(
        GateTimings::default(),
        relay.clone(),
        LimitSwitches::none(),
        events.clone(),
        metrics.clone(),
    ));

    let mut source = FrameSource::new("in", Box::new(SteadyCamera), metrics.clone());
    source.start();

    let entry = EntryWatch::new(
        source.reader(),
        Box::new(FixedPlate("AB1234")),
        Arc::new(Whitelist::from_lines("AB1234\n")),
        EntryTriggerPolicy::default(),
        5,
        gate.clone(),
        events,
        metrics.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let entry_task = tokio::spawn(entry.run(shutdown_rx));

    // Car sits in front of the camera for two minutes
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(relay.pulses.load(Ordering::SeqCst), 1);
    assert_eq!(gate.state(), GateState::Closed);
    assert!(!gate.is_inhibited());

    let summary = metrics.report();
    assert_eq!(summary.requests_in, 1);
    assert_eq!(summary.cycles_completed, 1);
    assert!(summary.frames_captured > 1000);

    shutdown_tx.send_replace(true);
    entry_task.await.unwrap();
    source.stop().await;
    assert!(!source.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_unlisted_plate_never_pulses_relay() {
    let metrics = Arc::new(Metrics::new());
    let events = Arc::new(EventLog::disabled());
    let relay = Arc::new(CountingRelay::default());
    let gate = Arc::new(GateController::new(
        GateTimings::default(),
        relay.clone(),
        LimitSwitches::none(),
        events.clone(),
        metrics.clone(),
    ));

    let mut source = FrameSource::new("in", Box::new(SteadyCamera), metrics.clone());
    source.start();
    let entry = EntryWatch::new(
        source.reader(),
        Box::new(FixedPlate("ZZ0000")),
        Arc::new(Whitelist::from_lines("AB1234\n")),
        EntryTriggerPolicy::default(),
        1,
        gate.clone(),
        events,
        metrics.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let entry_task = tokio::spawn(entry.run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(relay.pulses.load(Ordering::SeqCst), 0);
    assert_eq!(gate.state(), GateState::Closed);

    shutdown_tx.send_replace(true);
    entry_task.await.unwrap();
    source.stop().await;
}
