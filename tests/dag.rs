//! End-to-end scenarios over [`mindtrace::dag::DagEngine`] against the
//! in-memory backend (`S1`, `S2`, `S3`, `S6` from `spec.md` §8, plus the
//! cross-branch rollback resolution recorded in `DESIGN.md`).

use std::sync::Arc;

use mindtrace::backend::memory::MemoryBackend;
use mindtrace::checkpoint::CheckpointStatus;
use mindtrace::dag::{DagEngine, MergeStrategy, RollbackTarget};
use mindtrace::value::Value;
use rustc_hash::FxHashMap;

fn confidence_metadata(c: f64) -> FxHashMap<String, Value> {
    let mut m = FxHashMap::default();
    m.insert("confidence".to_string(), Value::Number(c));
    m
}

async fn fresh_engine() -> DagEngine {
    DagEngine::open(Arc::new(MemoryBackend::new())).await.unwrap()
}

fn state(pairs: &[(&str, Value)]) -> Value {
    let mut m = FxHashMap::default();
    for (k, v) in pairs {
        m.insert((*k).to_string(), v.clone());
    }
    Value::Map(m)
}

#[tokio::test]
async fn s1_linear_happy_path() {
    let mut engine = fresh_engine().await;

    let first = engine
        .checkpoint(
            state(&[
                ("task", Value::String("t".to_string())),
                ("status", Value::String("received".to_string())),
            ]),
            confidence_metadata(1.0),
            "start",
            "intake",
        )
        .await
        .unwrap();
    let second = engine
        .checkpoint(
            state(&[("step", Value::Number(1.0))]),
            confidence_metadata(0.9),
            "plan",
            "plan",
        )
        .await
        .unwrap();

    let history = engine.history(10, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|cp| cp.status == CheckpointStatus::Active));
    assert_eq!(second.parent_id.as_deref(), Some(first.id.as_str()));
}

#[tokio::test]
async fn s2_rollback_restores_state() {
    let mut engine = fresh_engine().await;
    let first = engine
        .checkpoint(Value::map(), confidence_metadata(1.0), "start", "intake")
        .await
        .unwrap();
    let second = engine
        .checkpoint(Value::map(), confidence_metadata(0.9), "plan", "plan")
        .await
        .unwrap();

    let restored = engine.rollback(RollbackTarget::Steps(1)).await.unwrap();
    assert_eq!(restored.id, first.id);

    let second_after = engine.history(10, None).await.unwrap();
    let second_row = second_after.iter().find(|cp| cp.id == second.id).unwrap();
    assert_eq!(second_row.status, CheckpointStatus::RolledBack);

    let branch = engine.switch_branch("main").await;
    assert!(branch.is_ok());
}

#[tokio::test]
async fn s3_branch_diverges_merge_combines() {
    let mut engine = fresh_engine().await;
    engine
        .checkpoint(Value::map(), confidence_metadata(1.0), "start", "intake")
        .await
        .unwrap();
    engine
        .checkpoint(Value::map(), confidence_metadata(0.9), "plan", "plan")
        .await
        .unwrap();

    engine.branch("alt").await.unwrap();
    let alt_head = engine
        .checkpoint(
            state(&[
                ("step", Value::Number(1.0)),
                ("source", Value::String("cache".to_string())),
            ]),
            confidence_metadata(0.75),
            "cached",
            "use_cache",
        )
        .await
        .unwrap();

    engine.switch_branch("main").await.unwrap();
    let main_head = engine
        .checkpoint(
            state(&[
                ("step", Value::Number(1.0)),
                ("source", Value::String("live".to_string())),
            ]),
            confidence_metadata(0.95),
            "live",
            "retrieve",
        )
        .await
        .unwrap();

    let merged = engine
        .merge("alt", MergeStrategy::PreferHigherConfidence)
        .await
        .unwrap();

    assert_eq!(merged.state, main_head.state);
    assert_eq!(
        merged.metadata.get("merged_from"),
        Some(&Value::String(alt_head.id.clone()))
    );

    let all = engine.history(100, None).await.unwrap();
    let main_head_row = all.iter().find(|cp| cp.id == main_head.id).unwrap();
    let alt_head_row = all.iter().find(|cp| cp.id == alt_head.id).unwrap();
    assert_eq!(main_head_row.status, CheckpointStatus::Merged);
    assert_eq!(alt_head_row.status, CheckpointStatus::Merged);
}

#[tokio::test]
async fn s6_diff_shows_key_changes() {
    let mut engine = fresh_engine().await;
    let a = engine
        .checkpoint(
            state(&[("x", Value::Number(1.0)), ("y", Value::Number(2.0))]),
            FxHashMap::default(),
            "a",
            "step",
        )
        .await
        .unwrap();
    let b = engine
        .checkpoint(
            state(&[("y", Value::Number(3.0)), ("z", Value::Number(4.0))]),
            FxHashMap::default(),
            "b",
            "step",
        )
        .await
        .unwrap();

    let diff = engine.diff(&a.id, &b.id).await.unwrap();
    assert_eq!(diff.added.get("z"), Some(&Value::Number(4.0)));
    assert_eq!(diff.removed.get("x"), Some(&Value::Number(1.0)));
    assert_eq!(
        diff.modified.get("y"),
        Some(&(Value::Number(2.0), Value::Number(3.0)))
    );
}

#[tokio::test]
async fn rollback_to_id_same_branch() {
    let mut engine = fresh_engine().await;
    let first = engine
        .checkpoint(Value::map(), FxHashMap::default(), "c0", "step")
        .await
        .unwrap();
    engine
        .checkpoint(Value::map(), FxHashMap::default(), "c1", "step")
        .await
        .unwrap();
    engine
        .checkpoint(Value::map(), FxHashMap::default(), "c2", "step")
        .await
        .unwrap();

    let restored = engine
        .rollback(RollbackTarget::CheckpointId(first.id.clone()))
        .await
        .unwrap();
    assert_eq!(restored.id, first.id);

    let branch = engine.history(1, Some("main")).await.unwrap();
    assert_eq!(branch[0].id, first.id);
}

#[tokio::test]
async fn rollback_to_id_crosses_branch() {
    // Invariant 3 under test: once the rollback target sits on a
    // different branch, every branch whose head fell inside the
    // rolled-back prefix must have its head repointed too, not just the
    // target branch's.
    let mut engine = fresh_engine().await;
    let root = engine
        .checkpoint(Value::map(), FxHashMap::default(), "root", "step")
        .await
        .unwrap();

    engine.branch("alt").await.unwrap();
    engine
        .checkpoint(Value::map(), FxHashMap::default(), "alt-1", "step")
        .await
        .unwrap();

    engine.switch_branch("main").await.unwrap();
    engine
        .checkpoint(Value::map(), FxHashMap::default(), "main-1", "step")
        .await
        .unwrap();
    engine
        .checkpoint(Value::map(), FxHashMap::default(), "main-2", "step")
        .await
        .unwrap();

    let restored = engine
        .rollback(RollbackTarget::CheckpointId(root.id.clone()))
        .await
        .unwrap();
    assert_eq!(restored.id, root.id);
    assert_eq!(engine.current_branch(), "main");

    let main_branch = engine.history(1, Some("main")).await.unwrap();
    assert_eq!(main_branch[0].id, root.id);

    engine.switch_branch("alt").await.unwrap();
    let alt_branch = engine.history(1, Some("alt")).await.unwrap();
    assert_eq!(
        alt_branch[0].id, root.id,
        "alt's head must not be left dangling on a rolled_back checkpoint"
    );
}

#[tokio::test]
async fn checkpoint_on_unrepresentable_payload_leaves_dag_unmutated() {
    let mut engine = fresh_engine().await;
    let before = engine.history(100, None).await.unwrap();
    assert!(before.is_empty());

    let result = engine
        .checkpoint(
            Value::Number(f64::NAN),
            FxHashMap::default(),
            "bad",
            "step",
        )
        .await;
    assert!(result.is_err());

    let after = engine.history(100, None).await.unwrap();
    assert!(after.is_empty(), "a failed checkpoint must not mutate the DAG");
}

#[tokio::test]
async fn branch_rejects_duplicate_names() {
    let mut engine = fresh_engine().await;
    engine.branch("alt").await.unwrap();
    let err = engine.branch("alt").await;
    assert!(err.is_err());
}

#[tokio::test]
async fn merge_fails_on_unknown_branch() {
    let mut engine = fresh_engine().await;
    engine
        .checkpoint(Value::map(), FxHashMap::default(), "root", "step")
        .await
        .unwrap();
    let err = engine.merge("nonexistent", MergeStrategy::PreferSource).await;
    assert!(err.is_err());
}
