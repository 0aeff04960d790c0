//! Lock-free metrics collection and periodic reporting
//!
//! Counters are monotonic atomics updated on the hot path. The gate-state
//! gauge mirrors the controller's state for the HTTP endpoint.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use crate::domain::types::{GateState, Origin};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

pub struct Metrics {
    started_at: Instant,
    frames_captured: AtomicU64,
    device_reconnects: AtomicU64,
    plate_readings: AtomicU64,
    motion_triggers: AtomicU64,
    requests_in: AtomicU64,
    requests_out: AtomicU64,
    requests_manual: AtomicU64,
    requests_refused: AtomicU64,
    cycles_completed: AtomicU64,
    limit_switch_timeouts: AtomicU64,
    gate_state: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub frames_captured: u64,
    pub device_reconnects: u64,
    pub plate_readings: u64,
    pub motion_triggers: u64,
    pub requests_in: u64,
    pub requests_out: u64,
    pub requests_manual: u64,
    pub requests_refused: u64,
    pub cycles_completed: u64,
    pub limit_switch_timeouts: u64,
    pub gate_state: u64,
}

impl MetricsSummary {
    pub fn requests_accepted(&self) -> u64 {
        self.requests_in + self.requests_out + self.requests_manual
    }

    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            frames = %self.frames_captured,
            reconnects = %self.device_reconnects,
            plates = %self.plate_readings,
            motion = %self.motion_triggers,
            accepted = %self.requests_accepted(),
            refused = %self.requests_refused,
            cycles = %self.cycles_completed,
            limit_timeouts = %self.limit_switch_timeouts,
            gate = %GateState::from_gauge(self.gate_state).as_str(),
            "metrics"
        );
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames_captured: AtomicU64::new(0),
            device_reconnects: AtomicU64::new(0),
            plate_readings: AtomicU64::new(0),
            motion_triggers: AtomicU64::new(0),
            requests_in: AtomicU64::new(0),
            requests_out: AtomicU64::new(0),
            requests_manual: AtomicU64::new(0),
            requests_refused: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            limit_switch_timeouts: AtomicU64::new(0),
            gate_state: AtomicU64::new(GateState::Closed.as_gauge()),
        }
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.device_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_plate_reading(&self) {
        self.plate_readings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_motion_trigger(&self) {
        self.motion_triggers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_request_accepted(&self, origin: Origin) {
        let counter = match origin {
            Origin::In => &self.requests_in,
            Origin::Out => &self.requests_out,
            Origin::Manual => &self.requests_manual,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_request_refused(&self) {
        self.requests_refused.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_limit_switch_timeout(&self) {
        self.limit_switch_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_gate_state(&self, state: GateState) {
        self.gate_state.store(state.as_gauge(), Ordering::Relaxed);
    }

    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            device_reconnects: self.device_reconnects.load(Ordering::Relaxed),
            plate_readings: self.plate_readings.load(Ordering::Relaxed),
            motion_triggers: self.motion_triggers.load(Ordering::Relaxed),
            requests_in: self.requests_in.load(Ordering::Relaxed),
            requests_out: self.requests_out.load(Ordering::Relaxed),
            requests_manual: self.requests_manual.load(Ordering::Relaxed),
            requests_refused: self.requests_refused.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            limit_switch_timeouts: self.limit_switch_timeouts.load(Ordering::Relaxed),
            gate_state: self.gate_state.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters_per_origin() {
        let metrics = Metrics::new();
        metrics.record_request_accepted(Origin::In);
        metrics.record_request_accepted(Origin::In);
        metrics.record_request_accepted(Origin::Out);
        metrics.record_request_refused();

        let summary = metrics.report();
        assert_eq!(summary.requests_in, 2);
        assert_eq!(summary.requests_out, 1);
        assert_eq!(summary.requests_manual, 0);
        assert_eq!(summary.requests_accepted(), 3);
        assert_eq!(summary.requests_refused, 1);
    }

    #[test]
    fn test_gate_state_gauge() {
        let metrics = Metrics::new();
        assert_eq!(metrics.report().gate_state, GateState::Closed.as_gauge());
        metrics.set_gate_state(GateState::Open);
        assert_eq!(GateState::from_gauge(metrics.report().gate_state), GateState::Open);
    }

    #[test]
    fn test_report_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_frame();
        metrics.record_frame();
        assert_eq!(metrics.report().frames_captured, 2);
        assert_eq!(metrics.report().frames_captured, 2);
    }
}
