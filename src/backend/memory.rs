//! Volatile, process-local backend. Lost on process exit.
//!
//! Grounded on `weavegraph::runtimes::checkpointer::InMemoryCheckpointer`:
//! an `RwLock`-guarded hash map, here split into two maps (checkpoints and
//! branches) to match the persistence interface's wider surface.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::RwLock;

use super::{Backend, Filter, Result, StorageError, apply_filter_and_sort};
use crate::checkpoint::{Branch, Checkpoint, CheckpointStatus};

#[derive(Default)]
struct Inner {
    checkpoints: FxHashMap<String, (u64, Checkpoint)>,
    branches: FxHashMap<String, Branch>,
    next_seq: u64,
}

/// In-memory backend. Fast, non-durable; suitable for tests and
/// ephemeral sessions.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut guard = self.lock_write()?;
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard
            .checkpoints
            .insert(checkpoint.id.clone(), (seq, checkpoint));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>> {
        let guard = self.lock_read()?;
        Ok(guard.checkpoints.get(id).map(|(_, cp)| cp.clone()))
    }

    async fn list(&self, filter: Filter) -> Result<Vec<Checkpoint>> {
        let guard = self.lock_read()?;
        let all: Vec<(u64, Checkpoint)> = guard
            .checkpoints
            .values()
            .map(|(seq, cp)| (*seq, cp.clone()))
            .collect();
        Ok(apply_filter_and_sort(all, &filter))
    }

    async fn update_status(&self, id: &str, new_status: CheckpointStatus) -> Result<()> {
        let mut guard = self.lock_write()?;
        let (_, cp) = guard
            .checkpoints
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })?;
        if !cp.status.can_transition_to(new_status) {
            return Err(StorageError::IllegalTransition {
                from: cp.status,
                to: new_status,
            });
        }
        cp.status = new_status;
        Ok(())
    }

    async fn put_branch(&self, branch: Branch) -> Result<()> {
        let mut guard = self.lock_write()?;
        guard.branches.insert(branch.name.clone(), branch);
        Ok(())
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let guard = self.lock_read()?;
        Ok(guard.branches.get(name).cloned())
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let guard = self.lock_read()?;
        Ok(guard.branches.values().cloned().collect())
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        let mut guard = self.lock_write()?;
        guard.branches.remove(name);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.lock_write()?;
        guard.checkpoints.clear();
        guard.branches.clear();
        guard.next_seq = 0;
        Ok(())
    }
}
