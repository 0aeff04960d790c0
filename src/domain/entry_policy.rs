//! Entry trigger debouncing
//!
//! Turns the per-frame stream of plate readings into single open decisions.
//! A plate that keeps being seen keeps refreshing its last-seen time, so it
//! can only fire again after it has been out of view for longer than the
//! cooldown. This only suppresses repeats of the same identity; physical
//! re-triggering is also held off by the gate controller's grace window.

use std::time::{Duration, Instant};
use tracing::debug;

/// Default minimum recognizer confidence for a reading to be eligible
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

/// Default identity cooldown
pub const DEFAULT_IDENTITY_COOLDOWN: Duration = Duration::from_secs(10);

/// One recognizer result as seen by the policy
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub identity: &'a str,
    pub confidence: f32,
    /// Text matched the expected plate format
    pub valid: bool,
    pub whitelisted: bool,
}

#[derive(Debug, Clone)]
struct Remembered {
    identity: String,
    last_seen: Instant,
}

pub struct EntryTriggerPolicy {
    min_confidence: f32,
    cooldown: Duration,
    last: Option<Remembered>,
}

impl EntryTriggerPolicy {
    pub fn new(min_confidence: f32, cooldown: Duration) -> Self {
        Self { min_confidence, cooldown, last: None }
    }

    /// Identity of the last accepted open
    pub fn last_identity(&self) -> Option<&str> {
        self.last.as_ref().map(|r| r.identity.as_str())
    }

    pub fn is_eligible(&self, candidate: &Candidate<'_>) -> bool {
        candidate.valid
            && candidate.whitelisted
            && !candidate.identity.is_empty()
            && candidate.confidence >= self.min_confidence
    }

    /// Decide whether this reading should request an open.
    ///
    /// A valid sighting of the remembered identity refreshes its last-seen
    /// time whatever the outcome. A new identity is only remembered once the
    /// gate accepts it, through [`record_open`](Self::record_open).
    pub fn evaluate(&mut self, candidate: Candidate<'_>, now: Instant) -> bool {
        let eligible = self.is_eligible(&candidate);
        match self.last.as_mut() {
            Some(last) if last.identity == candidate.identity => {
                let idle = now.saturating_duration_since(last.last_seen);
                if candidate.valid {
                    last.last_seen = now;
                }
                if !eligible {
                    return false;
                }
                let should_open = idle > self.cooldown;
                debug!(
                    identity = %candidate.identity,
                    idle_ms = %idle.as_millis(),
                    should_open = %should_open,
                    "entry_repeat_identity"
                );
                should_open
            }
            _ => {
                if eligible {
                    debug!(
                        identity = %candidate.identity,
                        previous = ?self.last_identity(),
                        "entry_new_identity"
                    );
                }
                eligible
            }
        }
    }

    /// Remember an identity the gate accepted
    pub fn record_open(&mut self, identity: &str, now: Instant) {
        self.last = Some(Remembered { identity: identity.to_string(), last_seen: now });
    }
}

impl Default for EntryTriggerPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE, DEFAULT_IDENTITY_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligible(identity: &str) -> Candidate<'_> {
        Candidate { identity, confidence: 0.5, valid: true, whitelisted: true }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    /// Evaluate with every open accepted by the gate
    fn decide(policy: &mut EntryTriggerPolicy, candidate: Candidate<'_>, now: Instant) -> bool {
        let open = policy.evaluate(candidate, now);
        if open {
            policy.record_open(candidate.identity, now);
        }
        open
    }

    #[test]
    fn test_first_sighting_opens() {
        let mut policy = EntryTriggerPolicy::default();
        assert!(decide(&mut policy, eligible("AB1234"), Instant::now()));
        assert_eq!(policy.last_identity(), Some("AB1234"));
    }

    #[test]
    fn test_repeat_within_cooldown_is_suppressed() {
        let mut policy = EntryTriggerPolicy::default();
        let t0 = Instant::now();
        assert!(decide(&mut policy, eligible("AB1234"), t0));
        assert!(!decide(&mut policy, eligible("AB1234"), t0 + secs(1)));
    }

    #[test]
    fn test_repeat_after_cooldown_opens() {
        let mut policy = EntryTriggerPolicy::default();
        let t0 = Instant::now();
        assert!(decide(&mut policy, eligible("AB1234"), t0));
        assert!(!decide(&mut policy, eligible("AB1234"), t0 + secs(1)));
        // Last seen at t0+1, so the cooldown runs from there
        assert!(decide(&mut policy, eligible("AB1234"), t0 + secs(12)));
    }

    #[test]
    fn test_continuously_visible_plate_does_not_refire() {
        let mut policy = EntryTriggerPolicy::default();
        let t0 = Instant::now();
        assert!(decide(&mut policy, eligible("AB1234"), t0));
        for s in 1..=30 {
            assert!(!decide(&mut policy, eligible("AB1234"), t0 + secs(s)));
        }
    }

    #[test]
    fn test_different_identity_always_opens() {
        let mut policy = EntryTriggerPolicy::default();
        let t0 = Instant::now();
        assert!(decide(&mut policy, eligible("AB1234"), t0));
        assert!(decide(&mut policy, eligible("XY9876"), t0 + secs(1)));
        // Switching back is a different identity again
        assert!(decide(&mut policy, eligible("AB1234"), t0 + secs(2)));
    }

    #[test]
    fn test_ineligible_candidates_never_open() {
        let mut policy = EntryTriggerPolicy::default();
        let now = Instant::now();

        let low = Candidate { identity: "AB1234", confidence: 0.29, valid: true, whitelisted: true };
        let invalid = Candidate { identity: "AB1234", confidence: 0.9, valid: false, whitelisted: true };
        let unknown = Candidate { identity: "AB1234", confidence: 0.9, valid: true, whitelisted: false };

        assert!(!policy.evaluate(low, now));
        assert!(!policy.evaluate(invalid, now));
        assert!(!policy.evaluate(unknown, now));
        assert_eq!(policy.last_identity(), None);
    }

    #[test]
    fn test_confidence_threshold_is_inclusive() {
        let mut policy = EntryTriggerPolicy::new(0.3, secs(10));
        let c = Candidate { identity: "AB1234", confidence: 0.3, valid: true, whitelisted: true };
        assert!(decide(&mut policy, c, Instant::now()));
    }

    #[test]
    fn test_ineligible_reading_keeps_memory() {
        let mut policy = EntryTriggerPolicy::default();
        let t0 = Instant::now();
        assert!(decide(&mut policy, eligible("AB1234"), t0));

        let other = Candidate { identity: "ZZ0000", confidence: 0.9, valid: true, whitelisted: false };
        assert!(!decide(&mut policy, other, t0 + secs(1)));
        assert_eq!(policy.last_identity(), Some("AB1234"));
        assert!(!decide(&mut policy, eligible("AB1234"), t0 + secs(2)));
    }

    #[test]
    fn test_refused_identity_is_not_remembered() {
        let mut policy = EntryTriggerPolicy::default();
        let t0 = Instant::now();
        // Gate busy: the caller never records the open
        for s in 0..30 {
            assert!(policy.evaluate(eligible("AB1234"), t0 + secs(s)));
        }
        assert_eq!(policy.last_identity(), None);

        assert!(decide(&mut policy, eligible("AB1234"), t0 + secs(30)));
        assert!(!policy.evaluate(eligible("AB1234"), t0 + secs(31)));
    }

    #[test]
    fn test_low_confidence_sighting_refreshes_remembered_plate() {
        let mut policy = EntryTriggerPolicy::default();
        let t0 = Instant::now();
        assert!(decide(&mut policy, eligible("AB1234"), t0));

        let blurry = Candidate { identity: "AB1234", confidence: 0.1, valid: true, whitelisted: true };
        for s in 1..=20 {
            assert!(!policy.evaluate(blurry, t0 + secs(s)));
        }
        assert!(!policy.evaluate(eligible("AB1234"), t0 + secs(21)));
    }
}
