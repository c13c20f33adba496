use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Outcome of a single attempt against a binding, recorded into its health
/// ring regardless of whether the binding's breaker is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BindingHealth {
    samples: VecDeque<Outcome>,
    window: usize,
    consecutive_failures: u32,
    state: BreakerState,
    opened_at: Option<Instant>,
}

impl BindingHealth {
    fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            consecutive_failures: 0,
            state: BreakerState::Closed,
            opened_at: None,
        }
    }

    fn push(&mut self, outcome: Outcome) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(outcome);
    }

    fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let successes = self
            .samples
            .iter()
            .filter(|o| **o == Outcome::Success)
            .count();
        successes as f64 / self.samples.len() as f64
    }
}

/// Per-binding health ring (§3 `HealthSample`, ≥100 samples) and consecutive
/// failure-count breaker state machine (§4.F). Closed → Open after
/// `threshold` consecutive failures; Open → HalfOpen after `cooldown`
/// elapses, allowing exactly one trial attempt; a trial success closes the
/// breaker, a trial failure reopens it and resets the cooldown clock.
///
/// Grounded in the exponential-backoff health tracker pattern used for
/// account cooldowns elsewhere in the corpus, simplified here to a fixed
/// consecutive-failure threshold and fixed cooldown per the data model.
pub struct HealthStore {
    window: usize,
    bindings: RwLock<HashMap<i64, BindingHealth>>,
}

impl HealthStore {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Records an attempt outcome and advances the breaker state machine for
    /// `binding_id`. `threshold` and `cooldown` come from the model's
    /// configured breaker settings (or the global defaults).
    pub fn record(&self, binding_id: i64, outcome: Outcome, threshold: u32, cooldown: Duration) {
        let mut bindings = self.bindings.write().unwrap();
        let health = bindings
            .entry(binding_id)
            .or_insert_with(|| BindingHealth::new(self.window));
        health.push(outcome);

        match outcome {
            Outcome::Success => {
                health.consecutive_failures = 0;
                health.state = BreakerState::Closed;
                health.opened_at = None;
            }
            Outcome::Failure => {
                health.consecutive_failures += 1;
                if health.state == BreakerState::HalfOpen
                    || health.consecutive_failures >= threshold
                {
                    health.state = BreakerState::Open;
                    health.opened_at = Some(Instant::now());
                }
            }
        }
        let _ = cooldown;
    }

    /// Whether `binding_id` may currently be dispatched to. Transitions
    /// Open → HalfOpen as a side effect once the cooldown has elapsed, so a
    /// single trial request is allowed through.
    pub fn is_eligible(&self, binding_id: i64, cooldown: Duration) -> bool {
        let mut bindings = self.bindings.write().unwrap();
        let Some(health) = bindings.get_mut(&binding_id) else {
            return true;
        };
        match health.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = health.opened_at.unwrap_or_else(Instant::now);
                if opened_at.elapsed() >= cooldown {
                    health.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn success_rate(&self, binding_id: i64) -> f64 {
        self.bindings
            .read()
            .unwrap()
            .get(&binding_id)
            .map(BindingHealth::success_rate)
            .unwrap_or(1.0)
    }

    pub fn state(&self, binding_id: i64) -> BreakerState {
        self.bindings
            .read()
            .unwrap()
            .get(&binding_id)
            .map(|h| h.state)
            .unwrap_or(BreakerState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failure_threshold() {
        let store = HealthStore::new(100);
        for _ in 0..2 {
            store.record(1, Outcome::Failure, 3, Duration::from_secs(30));
        }
        assert!(store.is_eligible(1, Duration::from_secs(30)));
        store.record(1, Outcome::Failure, 3, Duration::from_secs(30));
        assert_eq!(store.state(1), BreakerState::Open);
        assert!(!store.is_eligible(1, Duration::from_secs(30)));
    }

    #[test]
    fn half_opens_after_cooldown_and_closes_on_trial_success() {
        let store = HealthStore::new(100);
        for _ in 0..3 {
            store.record(1, Outcome::Failure, 3, Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.is_eligible(1, Duration::from_millis(1)));
        assert_eq!(store.state(1), BreakerState::HalfOpen);
        store.record(1, Outcome::Success, 3, Duration::from_millis(1));
        assert_eq!(store.state(1), BreakerState::Closed);
    }

    #[test]
    fn trial_failure_reopens_the_breaker() {
        let store = HealthStore::new(100);
        for _ in 0..3 {
            store.record(1, Outcome::Failure, 3, Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.is_eligible(1, Duration::from_millis(1)));
        store.record(1, Outcome::Failure, 3, Duration::from_millis(1));
        assert_eq!(store.state(1), BreakerState::Open);
    }

    #[test]
    fn success_rate_reflects_ring_contents() {
        let store = HealthStore::new(4);
        store.record(1, Outcome::Success, 100, Duration::from_secs(30));
        store.record(1, Outcome::Success, 100, Duration::from_secs(30));
        store.record(1, Outcome::Failure, 100, Duration::from_secs(30));
        assert!((store.success_rate(1) - (2.0 / 3.0)).abs() < 1e-9);
    }
}
