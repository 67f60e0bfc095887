//! Recovery strategies (`spec.md` §4.C): pluggable policies that decide
//! what [`crate::orchestrator`] does after a guarded call fails.
//!
//! Grounded on `other_examples/oblinger-skill-docket-app`'s
//! `RecoveryEngine`, which separates "find a plan" from "apply it" the same
//! way `Outcome` separates "decide" from the orchestrator's "act".

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::value::{Value, shallow_override};

/// What a [`RecoveryStrategy`] decides to do after a failure.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Try again, optionally after mutating state, waiting `delay` first.
    Retry { state: Value, delay: Duration },
    /// Abandon the failed state and continue with `state` instead.
    Fallback { state: Value },
    /// No further recovery is possible; propagate the original error.
    GiveUp,
}

/// A policy invoked with the failed state and the attempt count so far
/// (`spec.md` §4.C). Implementations must be side-effect free: they decide,
/// they don't act.
pub trait RecoveryStrategy: Send + Sync {
    fn recover(&self, state: &Value, attempt: u32, error: &str) -> Outcome;

    /// Human-readable name used in orchestrator tracing spans.
    fn name(&self) -> &str;
}

/// Retries up to `max_attempts` times with exponential backoff starting at
/// `base_delay`, doubling each attempt, capped at `max_delay`.
pub struct RetryWithBackoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryWithBackoff {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }
}

impl RecoveryStrategy for RetryWithBackoff {
    fn recover(&self, state: &Value, attempt: u32, _error: &str) -> Outcome {
        if attempt >= self.max_attempts {
            return Outcome::GiveUp;
        }
        let scale = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(scale).min(self.max_delay);
        Outcome::Retry {
            state: state.clone(),
            delay,
        }
    }

    fn name(&self) -> &str {
        "retry_with_backoff"
    }
}

/// Overlays `patch` onto the failed state (via [`shallow_override`]) and
/// retries once; gives up on any later attempt.
pub struct AlternativePath {
    pub patch: Value,
}

impl AlternativePath {
    #[must_use]
    pub fn new(patch: Value) -> Self {
        Self { patch }
    }
}

impl RecoveryStrategy for AlternativePath {
    fn recover(&self, state: &Value, attempt: u32, _error: &str) -> Outcome {
        if attempt > 0 {
            return Outcome::GiveUp;
        }
        Outcome::Retry {
            state: shallow_override(state, &self.patch),
            delay: Duration::ZERO,
        }
    }

    fn name(&self) -> &str {
        "alternative_path"
    }
}

/// Never retries; falls back immediately, once, to either a caller-supplied
/// `fallback_state` or (when `None`) the failed state overlaid with
/// `{"mode": "degraded", "simplified": true}`. On the next attempt, gives up.
pub struct DegradeGracefully {
    pub fallback_state: Option<Value>,
}

impl DegradeGracefully {
    /// Falls back to a specific, caller-chosen state.
    #[must_use]
    pub fn new(fallback_state: Value) -> Self {
        Self {
            fallback_state: Some(fallback_state),
        }
    }

    /// Falls back to the failed state overlaid with the default degraded
    /// marker instead of a caller-supplied replacement.
    #[must_use]
    pub fn overlay() -> Self {
        Self {
            fallback_state: None,
        }
    }
}

impl Default for DegradeGracefully {
    fn default() -> Self {
        Self::overlay()
    }
}

impl RecoveryStrategy for DegradeGracefully {
    fn recover(&self, state: &Value, attempt: u32, _error: &str) -> Outcome {
        if attempt > 0 {
            return Outcome::GiveUp;
        }
        let fallback = self.fallback_state.clone().unwrap_or_else(|| {
            let mut overlay = FxHashMap::default();
            overlay.insert("mode".to_string(), Value::String("degraded".to_string()));
            overlay.insert("simplified".to_string(), Value::Bool(true));
            shallow_override(state, &Value::Map(overlay))
        });
        Outcome::Fallback { state: fallback }
    }

    fn name(&self) -> &str {
        "degrade_gracefully"
    }
}

/// Tries each inner strategy in order, using the first that doesn't give
/// up. Attempt counters are independent per strategy: a `Composite` running
/// `[A, B]` tries `A` until it gives up, then restarts at `B`'s attempt 0.
pub struct Composite {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Composite {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// Which inner strategy owns `attempt`, and that strategy's own local
    /// attempt counter. A strategy is consulted until it returns `GiveUp`,
    /// which this implementation detects by re-querying each strategy from
    /// the start for every attempt — acceptable since strategies are pure
    /// functions of `(state, attempt, error)` with no hidden counters.
    fn dispatch(&self, state: &Value, attempt: u32, error: &str) -> Outcome {
        let mut remaining = attempt;
        for strategy in &self.strategies {
            let mut local = 0;
            loop {
                match strategy.recover(state, local, error) {
                    Outcome::GiveUp => break,
                    decided => {
                        if remaining == 0 {
                            return decided;
                        }
                        remaining -= 1;
                        local += 1;
                    }
                }
            }
        }
        Outcome::GiveUp
    }
}

impl RecoveryStrategy for Composite {
    fn recover(&self, state: &Value, attempt: u32, error: &str) -> Outcome {
        self.dispatch(state, attempt, error)
    }

    fn name(&self) -> &str {
        "composite"
    }
}

/// Always gives up immediately. Useful as a default / explicit opt-out.
pub struct NoopStrategy;

impl RecoveryStrategy for NoopStrategy {
    fn recover(&self, _state: &Value, _attempt: u32, _error: &str) -> Outcome {
        Outcome::GiveUp
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_with_backoff_doubles_then_gives_up() {
        let strategy = RetryWithBackoff::new(3, Duration::from_millis(100), Duration::from_secs(5));
        let state = Value::map();

        match strategy.recover(&state, 0, "boom") {
            Outcome::Retry { delay, .. } => assert_eq!(delay, Duration::from_millis(100)),
            other => panic!("expected retry, got {other:?}"),
        }
        match strategy.recover(&state, 1, "boom") {
            Outcome::Retry { delay, .. } => assert_eq!(delay, Duration::from_millis(200)),
            other => panic!("expected retry, got {other:?}"),
        }
        assert!(matches!(strategy.recover(&state, 3, "boom"), Outcome::GiveUp));
    }

    #[test]
    fn alternative_path_overlays_once() {
        let mut patch = rustc_hash::FxHashMap::default();
        patch.insert("mode".to_string(), Value::String("safe".to_string()));
        let strategy = AlternativePath::new(Value::Map(patch));

        match strategy.recover(&Value::map(), 0, "err") {
            Outcome::Retry { state, .. } => {
                assert_eq!(
                    state.as_map().unwrap()["mode"],
                    Value::String("safe".to_string())
                );
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert!(matches!(
            strategy.recover(&Value::map(), 1, "err"),
            Outcome::GiveUp
        ));
    }

    #[test]
    fn degrade_gracefully_falls_back_once_then_gives_up() {
        let strategy = DegradeGracefully::new(Value::String("degraded".to_string()));
        assert!(matches!(
            strategy.recover(&Value::map(), 0, "err"),
            Outcome::Fallback { .. }
        ));
        assert!(matches!(
            strategy.recover(&Value::map(), 1, "err"),
            Outcome::GiveUp
        ));
    }

    #[test]
    fn degrade_gracefully_overlay_marks_failed_state() {
        let strategy = DegradeGracefully::overlay();
        let mut base = rustc_hash::FxHashMap::default();
        base.insert("progress".to_string(), Value::Number(3.0));
        let state = Value::Map(base);

        match strategy.recover(&state, 0, "err") {
            Outcome::Fallback { state } => {
                let map = state.as_map().unwrap();
                assert_eq!(map["mode"], Value::String("degraded".to_string()));
                assert_eq!(map["simplified"], Value::Bool(true));
                assert_eq!(map["progress"], Value::Number(3.0));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn composite_falls_through_to_second_strategy() {
        let composite = Composite::new(vec![
            Box::new(AlternativePath::new(Value::map())),
            Box::new(DegradeGracefully::new(Value::String("last_resort".to_string()))),
        ]);
        assert!(matches!(
            composite.recover(&Value::map(), 0, "err"),
            Outcome::Retry { .. }
        ));
        assert!(matches!(
            composite.recover(&Value::map(), 1, "err"),
            Outcome::Fallback { .. }
        ));
        assert!(matches!(
            composite.recover(&Value::map(), 2, "err"),
            Outcome::GiveUp
        ));
    }
}
