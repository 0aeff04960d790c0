//! Gate controller - sole owner of the relay
//!
//! Open requests are tagged with their origin. A request is refused while a
//! cycle is in flight (global inhibit) or while its origin is inside its
//! grace window. An accepted request pulses the relay and hands the rest of
//! the cycle to a spawned tracker task:
//!
//! `CLOSED -> OPENING -> OPEN -> CLOSING -> CLOSED`, then a cooldown, then
//! the inhibit is released.
//!
//! Each position wait uses the matching limit switch when one is present and
//! always ends at its timeout, so a dead sensor cannot keep the gate inhibited.

use crate::domain::types::{GateState, Origin};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::event_log::EventLog;
use crate::io::limit_switch::{LimitSwitch, LimitSwitches};
use crate::io::relay::Actuator;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cycle timing, all phases bounded
#[derive(Debug, Clone, PartialEq)]
pub struct GateTimings {
    /// How long the relay is held on
    pub pulse: Duration,
    pub opening_timeout: Duration,
    /// Dwell in OPEN before the gate closes by itself
    pub open_auto_close: Duration,
    pub closing_timeout: Duration,
    /// Extra hold after CLOSED before new requests are accepted
    pub cooldown_after_close: Duration,
    /// Per-origin refusal window after an accepted request
    pub grace: Duration,
    pub limit_poll: Duration,
}

impl Default for GateTimings {
    fn default() -> Self {
        Self {
            pulse: Duration::from_millis(700),
            opening_timeout: Duration::from_secs(5),
            open_auto_close: Duration::from_secs(15),
            closing_timeout: Duration::from_secs(10),
            cooldown_after_close: Duration::from_secs(8),
            grace: Duration::from_secs(60),
            limit_poll: Duration::from_millis(50),
        }
    }
}

impl GateTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pulse: config.pulse_duration(),
            opening_timeout: config.opening_timeout(),
            open_auto_close: config.open_auto_close(),
            closing_timeout: config.closing_timeout(),
            cooldown_after_close: config.cooldown_after_close(),
            grace: config.grace_period(),
            limit_poll: config.limit_poll_interval(),
        }
    }
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Inhibited,
    Grace,
}

impl Refusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Refusal::Inhibited => "inhibited",
            Refusal::Grace => "grace",
        }
    }
}

/// Outcome of waiting for an end position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionWait {
    /// The limit switch asserted
    Reached,
    /// The limit switch never asserted within the timeout
    TimedOut,
    /// No switch configured, waited the full timeout
    Timed,
}

/// Wait until `switch` asserts or `timeout` elapses, whichever comes first.
/// Without a switch this is a plain sleep of `timeout`.
pub async fn wait_for_position(
    switch: Option<&dyn LimitSwitch>,
    timeout: Duration,
    poll: Duration,
) -> PositionWait {
    let Some(switch) = switch else {
        tokio::time::sleep(timeout).await;
        return PositionWait::Timed;
    };

    let poll_loop = async {
        loop {
            if switch.is_pressed() {
                return;
            }
            tokio::time::sleep(poll).await;
        }
    };

    match tokio::time::timeout(timeout, poll_loop).await {
        Ok(()) => PositionWait::Reached,
        Err(_) => PositionWait::TimedOut,
    }
}

/// Snapshot for the HTTP endpoint
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub state: GateState,
    pub inhibit: bool,
    /// Remaining grace per origin, in milliseconds
    pub grace_ms: FxHashMap<Origin, u64>,
}

/// Clears the inhibit flag when dropped, so even an aborted cycle releases it
struct InhibitRelease<'a>(&'a AtomicBool);

impl Drop for InhibitRelease<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct GateController {
    timings: GateTimings,
    actuator: Arc<dyn Actuator>,
    switches: LimitSwitches,
    events: Arc<EventLog>,
    metrics: Arc<Metrics>,
    /// Set while a cycle is in flight. At most one tracker runs at a time.
    inhibit: AtomicBool,
    grace_until: Mutex<FxHashMap<Origin, Instant>>,
    state_tx: watch::Sender<GateState>,
}

impl GateController {
    pub fn new(
        timings: GateTimings,
        actuator: Arc<dyn Actuator>,
        switches: LimitSwitches,
        events: Arc<EventLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        info!(
            pulse_ms = %timings.pulse.as_millis(),
            opening_timeout_ms = %timings.opening_timeout.as_millis(),
            open_auto_close_ms = %timings.open_auto_close.as_millis(),
            closing_timeout_ms = %timings.closing_timeout.as_millis(),
            cooldown_after_close_ms = %timings.cooldown_after_close.as_millis(),
            grace_ms = %timings.grace.as_millis(),
            open_switch = %switches.open.is_some(),
            closed_switch = %switches.closed.is_some(),
            "gate_controller_ready"
        );
        let (state_tx, _) = watch::channel(GateState::Closed);
        metrics.set_gate_state(GateState::Closed);
        Self {
            timings,
            actuator,
            switches,
            events,
            metrics,
            inhibit: AtomicBool::new(false),
            grace_until: Mutex::new(FxHashMap::default()),
            state_tx,
        }
    }

    pub fn state(&self) -> GateState {
        *self.state_tx.borrow()
    }

    /// Watch gate state transitions
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state_tx.subscribe()
    }

    pub fn is_inhibited(&self) -> bool {
        self.inhibit.load(Ordering::Acquire)
    }

    pub fn timings(&self) -> &GateTimings {
        &self.timings
    }

    /// Time left in `origin`'s grace window, if it is still open
    pub fn grace_remaining(&self, origin: Origin) -> Option<Duration> {
        self.grace_remaining_at(origin, Instant::now())
    }

    fn grace_remaining_at(&self, origin: Origin, now: Instant) -> Option<Duration> {
        let until = *self.grace_until.lock().get(&origin)?;
        (now < until).then(|| until - now)
    }

    pub fn status(&self) -> GateStatus {
        let now = Instant::now();
        let grace_ms = self
            .grace_until
            .lock()
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(origin, until)| (*origin, (*until - now).as_millis() as u64))
            .collect();
        GateStatus { state: self.state(), inhibit: self.is_inhibited(), grace_ms }
    }

    /// Ask for the gate to open.
    ///
    /// Returns `false` without side effects on the relay when refused.
    /// On acceptance the relay pulse completes before this returns; the rest
    /// of the cycle runs in a spawned task.
    pub async fn request_open(self: &Arc<Self>, origin: Origin, reason: &str) -> bool {
        let now = Instant::now();

        if let Some(remaining) = self.grace_remaining_at(origin, now) {
            self.refuse(origin, reason, Refusal::Grace, Some(remaining));
            return false;
        }

        let claimed =
            self.inhibit.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
        if claimed.is_err() {
            self.refuse(origin, reason, Refusal::Inhibited, None);
            return false;
        }

        self.grace_until.lock().insert(origin, now + self.timings.grace);
        self.metrics.record_request_accepted(origin);
        info!(origin = %origin, reason = %reason, state = %self.state(), "gate_request_accepted");
        self.events.log(
            "request_open",
            json!({"cam": origin.as_str(), "reason": reason, "state": self.state().as_str()}),
        );

        // The cycle owns the inhibit from here on; it survives this caller being dropped
        let (pulse_done_tx, pulse_done_rx) = oneshot::channel();
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            gate.run_cycle(pulse_done_tx).await;
        });
        let _ = pulse_done_rx.await;
        true
    }

    fn refuse(&self, origin: Origin, reason: &str, refusal: Refusal, remaining: Option<Duration>) {
        self.metrics.record_request_refused();
        let remaining_ms = remaining.map(|d| d.as_millis() as u64);
        debug!(
            origin = %origin,
            reason = %reason,
            refusal = %refusal.as_str(),
            grace_remaining_ms = ?remaining_ms,
            "gate_request_refused"
        );
        self.events.log(
            "request_refused",
            json!({
                "cam": origin.as_str(),
                "reason": reason,
                "cause": refusal.as_str(),
                "grace_remaining_ms": remaining_ms,
            }),
        );
    }

    async fn pulse(&self) {
        self.actuator.on().await;
        tokio::time::sleep(self.timings.pulse).await;
        self.actuator.off().await;
    }

    async fn run_cycle(self: Arc<Self>, pulse_done: oneshot::Sender<()>) {
        let release = InhibitRelease(&self.inhibit);
        let started = Instant::now();

        self.pulse().await;
        let _ = pulse_done.send(());

        self.transition(GateState::Opening);
        self.wait_phase(self.switches.open.as_deref(), self.timings.opening_timeout, "open").await;
        self.transition(GateState::Open);

        tokio::time::sleep(self.timings.open_auto_close).await;

        self.transition(GateState::Closing);
        self.wait_phase(self.switches.closed.as_deref(), self.timings.closing_timeout, "closed")
            .await;
        self.transition(GateState::Closed);

        tokio::time::sleep(self.timings.cooldown_after_close).await;
        drop(release);

        let cycle_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_cycle_completed();
        info!(cycle_ms = %cycle_ms, "gate_inhibit_off");
        self.events.log("gate_inhibit_off", json!({"cycle_ms": cycle_ms}));
    }

    async fn wait_phase(&self, switch: Option<&dyn LimitSwitch>, timeout: Duration, position: &str) {
        let outcome = wait_for_position(switch, timeout, self.timings.limit_poll).await;
        if outcome == PositionWait::TimedOut {
            self.metrics.record_limit_switch_timeout();
            warn!(position = %position, timeout_ms = %timeout.as_millis(), "limit_switch_timeout");
        }
    }

    fn transition(&self, next: GateState) {
        let prev = self.state();
        debug_assert_eq!(prev.next(), next, "gate state must advance linearly");
        self.state_tx.send_replace(next);
        self.metrics.set_gate_state(next);
        info!(from = %prev, to = %next, "gate_state");
        self.events.log("gate_state", json!({"state": next.as_str()}));
    }
}
