//! A scoped checkpoint: create on enter, roll back on abnormal exit
//! (`spec.md` §9's "decorators and context managers" note, re-architected
//! without a source-ecosystem-specific mechanism).
//!
//! Rust has no exception-unwinding context manager equivalent for async
//! code, so the "guaranteed release" half of this pattern is expressed as
//! an explicit `guarded` scope rather than relying on `Drop`: `Drop` can't
//! run an async rollback, so [`CheckpointGuard`]'s `Drop` impl is a
//! diagnostic safety net (it warns if neither `commit` nor `rollback` ran),
//! not the actual release mechanism.
//!
//! Call [`guarded`] against a session's own engine
//! (`session.engine_handle().lock().await`) rather than a fresh
//! `DagEngine`, so it shares the same single-writer mutex as every other
//! [`crate::session::Session`] operation.

use std::future::Future;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::checkpoint::Checkpoint;
use crate::dag::{DagEngine, RollbackError, RollbackTarget};
use crate::value::Value;

/// Holds the entry checkpoint for one scoped region. Obtain one via
/// [`guarded`] rather than constructing directly.
pub struct CheckpointGuard {
    entry: Checkpoint,
    released: bool,
}

impl CheckpointGuard {
    fn new(entry: Checkpoint) -> Self {
        Self {
            entry,
            released: false,
        }
    }

    #[must_use]
    pub fn entry_checkpoint(&self) -> &Checkpoint {
        &self.entry
    }

    fn commit(mut self) {
        self.released = true;
    }

    async fn rollback(mut self, engine: &mut DagEngine) -> Result<Checkpoint, RollbackError> {
        self.released = true;
        engine
            .rollback(RollbackTarget::CheckpointId(self.entry.id.clone()))
            .await
    }
}

impl Drop for CheckpointGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                checkpoint_id = %self.entry.id,
                "CheckpointGuard dropped without commit or rollback; scope exited abnormally \
                 without going through guarded()"
            );
        }
    }
}

/// Run `body` inside a scoped checkpoint: checkpoints `state` on entry,
/// commits (leaving the entry checkpoint in place) if `body` succeeds, and
/// rolls back to the entry checkpoint if it fails.
pub async fn guarded<F, Fut, T, E>(
    engine: &mut DagEngine,
    state: Value,
    description: &str,
    body: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<RollbackError>,
{
    let entry = engine
        .checkpoint(state, FxHashMap::default(), description, "guarded")
        .await
        .map_err(RollbackError::from)?;
    let guard = CheckpointGuard::new(entry);

    match body().await {
        Ok(value) => {
            guard.commit();
            Ok(value)
        }
        Err(err) => {
            let checkpoint_id = guard.entry_checkpoint().id.clone();
            if let Err(rollback_err) = guard.rollback(engine).await {
                warn!(
                    checkpoint_id = %checkpoint_id,
                    error = %rollback_err,
                    "rollback after guarded() body failure also failed; DAG may still be \
                     pointing past the entry checkpoint"
                );
            }
            Err(err)
        }
    }
}
