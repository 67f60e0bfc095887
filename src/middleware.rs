//! Middleware capability for external agent frameworks (`spec.md` §9):
//! `{wrap(call, label) → wrapped_call}`. Host frameworks pass their own
//! invokers through [`Middleware::wrap`] to get safe-execution coverage
//! without depending on this crate's internals directly.
//!
//! Construct with a session's own handles
//! ([`crate::session::Session::engine_handle`]/
//! [`crate::session::Session::metrics_handle`]) rather than a fresh
//! `DagEngine`, so wrapped calls share the same single-writer mutex as
//! every other `Session` operation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::dag::DagEngine;
use crate::metrics::Metrics;
use crate::orchestrator::{self, CancellationToken, ExecutionError};
use crate::recovery::RecoveryStrategy;
use crate::value::Value;

/// A shareable `Value -> Value` async call. `Arc`-based (not `Box`) so
/// `wrap`'s returned closure can invoke the same call across retries
/// without needing it to be `Clone`.
pub type Call = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync>;

/// A host-framework-agnostic capability: wrap any [`Call`] so it runs
/// under [`crate::orchestrator::safe_execute`].
pub struct Middleware {
    engine: Arc<Mutex<DagEngine>>,
    strategies: Arc<Vec<Box<dyn RecoveryStrategy>>>,
    metrics: Arc<Metrics>,
    max_retries: u32,
}

impl Middleware {
    #[must_use]
    pub fn new(
        engine: Arc<Mutex<DagEngine>>,
        strategies: Vec<Box<dyn RecoveryStrategy>>,
        metrics: Arc<Metrics>,
        max_retries: u32,
    ) -> Self {
        Self {
            engine,
            strategies: Arc::new(strategies),
            metrics,
            max_retries,
        }
    }

    /// Wrap `call` (labeled `label` for tracing) so invoking the returned
    /// closure runs it through `safe_execute` with this middleware's
    /// configured strategies, with no fallback and no cancellation signal.
    pub fn wrap(&self, call: Call, label: impl Into<String>) -> Call {
        let engine = Arc::clone(&self.engine);
        let strategies = Arc::clone(&self.strategies);
        let metrics = Arc::clone(&self.metrics);
        let max_retries = self.max_retries;
        let label = label.into();

        Arc::new(move |state: Value| {
            let engine = Arc::clone(&engine);
            let strategies = Arc::clone(&strategies);
            let metrics = Arc::clone(&metrics);
            let label = label.clone();
            let call = Arc::clone(&call);
            Box::pin(async move {
                let mut guard = engine.lock().await;
                let none_fallback: Option<
                    fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>,
                > = None;
                let outcome = orchestrator::safe_execute(
                    &mut guard,
                    &strategies,
                    state,
                    &label,
                    max_retries,
                    move |s| call(s),
                    none_fallback,
                    None::<&CancellationToken>,
                    &metrics,
                )
                .await;
                outcome
                    .map(|(value, _checkpoint)| value)
                    .map_err(execution_error_to_string)
            })
        })
    }
}

fn execution_error_to_string(err: ExecutionError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::recovery::NoopStrategy;

    #[tokio::test]
    async fn wrap_passes_through_on_success() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = Arc::new(Mutex::new(DagEngine::open(backend).await.unwrap()));
        let metrics = Arc::new(Metrics::new());
        let middleware = Middleware::new(engine, vec![Box::new(NoopStrategy)], metrics, 0);

        let call: Call = Arc::new(|v: Value| Box::pin(async move { Ok(v) }));
        let wrapped = middleware.wrap(call, "identity");
        let result = wrapped(Value::String("ok".to_string())).await.unwrap();
        assert_eq!(result, Value::String("ok".to_string()));
    }
}
