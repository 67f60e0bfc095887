//! `safe_execute` scenarios S4, S5 (`spec.md` §8) plus cancellation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mindtrace::backend::memory::MemoryBackend;
use mindtrace::dag::DagEngine;
use mindtrace::metrics::Metrics;
use mindtrace::orchestrator::{self, CancellationToken};
use mindtrace::recovery::{NoopStrategy, RecoveryStrategy, RetryWithBackoff};
use mindtrace::value::Value;
use rustc_hash::FxHashMap;

async fn fresh_engine() -> DagEngine {
    DagEngine::open(Arc::new(MemoryBackend::new())).await.unwrap()
}

fn ok_state() -> Value {
    let mut m = FxHashMap::default();
    m.insert("ok".to_string(), Value::Bool(true));
    Value::Map(m)
}

#[tokio::test]
async fn s4_retry_then_success() {
    let mut engine = fresh_engine().await;
    let metrics = Metrics::new();
    let strategies: Vec<Box<dyn RecoveryStrategy>> = vec![Box::new(RetryWithBackoff::new(
        3,
        Duration::ZERO,
        Duration::ZERO,
    ))];

    let attempt = Arc::new(AtomicU32::new(0));
    let attempt_for_closure = Arc::clone(&attempt);
    let func = move |_state: Value| {
        let attempt = Arc::clone(&attempt_for_closure);
        async move {
            let n = attempt.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("boom".to_string())
            } else {
                Ok(ok_state())
            }
        }
    };

    let none_fallback: Option<fn(Value) -> std::future::Ready<Result<Value, String>>> = None;

    let (result, success_cp) = orchestrator::safe_execute(
        &mut engine,
        &strategies,
        Value::map(),
        "s4",
        3,
        func,
        none_fallback,
        None,
        &metrics,
    )
    .await
    .unwrap();

    assert_eq!(result, ok_state());
    assert_eq!(success_cp.description, "success");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.errors_caught, 2);
    assert_eq!(snapshot.rollbacks, 0);
    assert_eq!(snapshot.checkpoints_created, 2);

    let history = engine.history(10, None).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn s5_exhausted_retries_fallback_succeeds() {
    let mut engine = fresh_engine().await;
    let metrics = Metrics::new();
    let strategies: Vec<Box<dyn RecoveryStrategy>> = vec![Box::new(NoopStrategy)];

    let func = |_state: Value| async move { Err::<Value, String>("always fails".to_string()) };
    let fallback = |_state: Value| async move {
        let mut m = FxHashMap::default();
        m.insert("ok".to_string(), Value::String("fb".to_string()));
        Ok::<Value, String>(Value::Map(m))
    };

    let (result, fallback_cp) = orchestrator::safe_execute(
        &mut engine,
        &strategies,
        Value::map(),
        "s5",
        1,
        func,
        Some(fallback),
        None,
        &metrics,
    )
    .await
    .unwrap();

    assert_eq!(
        result.as_map().unwrap()["ok"],
        Value::String("fb".to_string())
    );
    assert_eq!(
        fallback_cp.metadata.get("recovery"),
        Some(&Value::String("fallback".to_string()))
    );

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.recoveries, 1);
    assert_eq!(snapshot.rollbacks, 1);
}

#[tokio::test]
async fn s5_exhausted_retries_no_fallback_signals_exhausted() {
    let mut engine = fresh_engine().await;
    let metrics = Metrics::new();
    let strategies: Vec<Box<dyn RecoveryStrategy>> = vec![Box::new(NoopStrategy)];

    let func = |_state: Value| async move { Err::<Value, String>("always fails".to_string()) };
    let none_fallback: Option<fn(Value) -> std::future::Ready<Result<Value, String>>> = None;

    let result = orchestrator::safe_execute(
        &mut engine,
        &strategies,
        Value::map(),
        "no-fallback",
        0,
        func,
        none_fallback,
        None,
        &metrics,
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn cancellation_during_retry_delay_rolls_back_without_fallback() {
    let mut engine = fresh_engine().await;
    let metrics = Metrics::new();
    let strategies: Vec<Box<dyn RecoveryStrategy>> = vec![Box::new(RetryWithBackoff::new(
        5,
        Duration::from_secs(30),
        Duration::from_secs(30),
    ))];
    let token = CancellationToken::new();
    let token_for_cancel = token.clone();

    let func = |_state: Value| async move { Err::<Value, String>("boom".to_string()) };
    let fallback_called = Arc::new(AtomicU32::new(0));
    let fallback_called_for_closure = Arc::clone(&fallback_called);
    let fallback = move |_state: Value| {
        let fallback_called = Arc::clone(&fallback_called_for_closure);
        async move {
            fallback_called.fetch_add(1, Ordering::SeqCst);
            Ok::<Value, String>(Value::map())
        }
    };

    let execution = tokio::spawn(async move {
        orchestrator::safe_execute(
            &mut engine,
            &strategies,
            Value::map(),
            "cancel-me",
            5,
            func,
            Some(fallback),
            Some(&token),
            &metrics,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    token_for_cancel.cancel();

    let result = execution.await.unwrap();
    assert!(matches!(
        result,
        Err(mindtrace::orchestrator::ExecutionError::Cancelled)
    ));
    assert_eq!(fallback_called.load(Ordering::SeqCst), 0);
}
