//! The safe-execution orchestrator (`spec.md` §4.E): checkpoint-before,
//! run, rollback-and-recover-on-failure.
//!
//! Grounded on `weavegraph::runtimes::runner`'s run-step-then-persist loop
//! for the overall shape, and on `tokio::sync::Notify` (as the pack uses
//! for its own shutdown signaling) for cancellation.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::instrument;

use crate::checkpoint::Checkpoint;
use crate::dag::{DagEngine, RollbackError, RollbackTarget};
use crate::metrics::Metrics;
use crate::recovery::{Outcome, RecoveryStrategy};
use crate::value::Value;

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutionError {
    #[error("all retries exhausted and no fallback succeeded: {last_error}")]
    #[diagnostic(
        code(mindtrace::orchestrator::exhausted),
        help("Provide a fallback callable or widen the recovery strategy chain.")
    )]
    Exhausted { last_error: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rollback(#[from] RollbackError),

    #[error("execution cancelled")]
    #[diagnostic(code(mindtrace::orchestrator::cancelled))]
    Cancelled,
}

/// A cooperative cancellation signal for [`safe_execute`]. Checked at loop
/// boundaries and during the retry delay (`spec.md` §5's "suspension
/// points" clause (ii)).
#[derive(Clone)]
pub struct CancellationToken {
    notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `delay`, waking early (and returning `true`) if cancelled.
    async fn sleep_or_cancel(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.is_cancelled();
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => self.is_cancelled(),
            () = self.notify.notified() => true,
        }
    }
}

/// `safe_execute(func, state, description, max_retries, fallback)` —
/// `spec.md` §4.E. `func` and `fallback` take the current state and return
/// the resulting state, erroring with a display string on failure (the
/// host-language "exception" from the source protocol, re-architected as a
/// `Result`).
#[instrument(skip(engine, strategies, func, fallback, cancellation, metrics))]
#[allow(clippy::too_many_arguments)]
pub async fn safe_execute<F, Fut, FB, FutB>(
    engine: &mut DagEngine,
    strategies: &[Box<dyn RecoveryStrategy>],
    state: Value,
    description: &str,
    max_retries: u32,
    func: F,
    fallback: Option<FB>,
    cancellation: Option<&CancellationToken>,
    metrics: &Metrics,
) -> Result<(Value, Checkpoint), ExecutionError>
where
    F: Fn(Value) -> Fut,
    Fut: Future<Output = Result<Value, String>>,
    FB: Fn(Value) -> FutB,
    FutB: Future<Output = Result<Value, String>>,
{
    let c0 = engine
        .checkpoint(state.clone(), FxHashMap::default(), description, "safe_execute")
        .await
        .map_err(RollbackError::from)?;
    metrics.checkpoint_created();

    let mut current_state = state;
    let mut last_error = String::new();
    let mut attempt = 0u32;

    let result = loop {
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            break None;
        }

        match func(current_state.clone()).await {
            Ok(value) => break Some(value),
            Err(err) => {
                metrics.error_caught();
                last_error = err.clone();

                let outcome = strategies
                    .iter()
                    .find_map(|s| match s.recover(&current_state, attempt, &err) {
                        Outcome::GiveUp => None,
                        decided => Some(decided),
                    })
                    .unwrap_or(Outcome::GiveUp);

                match outcome {
                    Outcome::Retry { state, delay } => {
                        if let Some(token) = cancellation {
                            if token.sleep_or_cancel(delay).await {
                                break None;
                            }
                        } else if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        current_state = state;
                        attempt += 1;
                    }
                    Outcome::Fallback { state } => {
                        current_state = state;
                        break None;
                    }
                    Outcome::GiveUp => break None,
                }

                if attempt > max_retries {
                    break None;
                }
                continue;
            }
        }
    };

    if let Some(value) = result {
        let c_success = engine
            .checkpoint(value.clone(), FxHashMap::default(), "success", "safe_execute")
            .await
            .map_err(RollbackError::from)?;
        metrics.checkpoint_created();
        return Ok((value, c_success));
    }

    metrics.rollback();
    let restored = engine
        .rollback(RollbackTarget::CheckpointId(c0.id.clone()))
        .await?;
    let time_saved = (chrono::Utc::now() - c0.timestamp)
        .num_milliseconds()
        .max(0) as u64;

    if cancellation.is_some_and(CancellationToken::is_cancelled) {
        return Err(ExecutionError::Cancelled);
    }

    if let Some(fallback) = fallback {
        match fallback(current_state).await {
            Ok(value) => {
                let mut metadata = FxHashMap::default();
                metadata.insert(
                    Checkpoint::META_RECOVERY.to_string(),
                    Value::String("fallback".to_string()),
                );
                let c_fallback = engine
                    .checkpoint(value.clone(), metadata, "fallback", "safe_execute")
                    .await
                    .map_err(RollbackError::from)?;
                metrics.checkpoint_created();
                metrics.recovery(time_saved);
                return Ok((value, c_fallback));
            }
            Err(err) => {
                return Err(ExecutionError::Exhausted { last_error: err });
            }
        }
    }

    let _ = restored;
    Err(ExecutionError::Exhausted { last_error })
}
