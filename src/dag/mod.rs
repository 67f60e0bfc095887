//! The checkpoint DAG engine (`spec.md` §4.D): branch-aware traversal,
//! rollback, merge, and diff over checkpoints held by a [`Backend`].
//!
//! `DagEngine` itself holds no lock; `spec.md` §5's single-writer model is
//! enforced by [`crate::session::Session`] wrapping one `DagEngine` in a
//! `tokio::sync::Mutex` (a sync mutex can't be held across the `.await`
//! points every mutating operation here needs). Grounded on
//! `weavegraph::runtimes::session` for the cursor-plus-backend shape, and on
//! `other_examples/oblinger-skill-docket-app`'s `RecoveryEngine::plan` for
//! the ancestor-walk idiom used by `rollback`.

mod diff;
mod error;
mod merge;

pub use diff::Diff;
pub use error::{BranchError, CheckpointError, MergeError, RollbackError};
pub use merge::MergeStrategy;

use chrono::Utc;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::backend::{Backend, Filter, Result as BackendResult, StorageError};
use crate::checkpoint::{Branch, Checkpoint, CheckpointStatus};
use crate::serializer::{Serializer, SerializerFlavor};
use crate::value::Value;

/// Where a rollback should land.
#[derive(Debug, Clone)]
pub enum RollbackTarget {
    /// Walk up `parent_id` this many times from the current head.
    Steps(u32),
    /// Roll back directly to the named checkpoint, which must be an
    /// ancestor of the current head (possibly on another branch).
    CheckpointId(String),
}

/// Branch-and-backend-aware traversal over the checkpoint DAG.
pub struct DagEngine {
    backend: Arc<dyn Backend>,
    current_branch: String,
    /// Used only to validate that a payload is representable before it
    /// reaches the backend (`spec.md` §4.A's `SerializationError` contract);
    /// the flavor otherwise has no bearing on how `MemoryBackend`/
    /// `FileTreeBackend` store a `Checkpoint` (they serialize the whole
    /// struct via `serde`), and `SqliteBackend` keeps its own `Serializer`
    /// for its blob columns.
    serializer: Serializer,
}

impl DagEngine {
    /// Open the engine against `backend` using the default (text) payload
    /// validation flavor, creating the `main` branch if it doesn't already
    /// exist (fresh stores start empty).
    pub async fn open(backend: Arc<dyn Backend>) -> BackendResult<Self> {
        Self::open_with_flavor(backend, SerializerFlavor::default()).await
    }

    /// Open the engine, validating checkpoint payloads with `flavor`.
    pub async fn open_with_flavor(
        backend: Arc<dyn Backend>,
        flavor: SerializerFlavor,
    ) -> BackendResult<Self> {
        if backend.get_branch(Branch::MAIN).await?.is_none() {
            backend.put_branch(Branch::root(Branch::MAIN)).await?;
        }
        Ok(Self {
            backend,
            current_branch: Branch::MAIN.to_string(),
            serializer: Serializer::new(flavor),
        })
    }

    #[must_use]
    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    /// Set the current-branch cursor without validating the backend has a
    /// matching `Branch` row. Used only during [`Self::restore_branch`]-based
    /// replay, where the branch row is written separately.
    pub(crate) fn set_current_branch_unchecked(&mut self, name: impl Into<String>) {
        self.current_branch = name.into();
    }

    async fn require_branch(&self, name: &str) -> BackendResult<Branch> {
        self.backend
            .get_branch(name)
            .await?
            .ok_or_else(|| StorageError::BranchNotFound {
                name: name.to_string(),
            })
    }

    /// Move the current-branch cursor to `name`, keeping each `Branch`
    /// record's `is_current` flag in sync (Invariant 1: exactly one branch
    /// has `is_current = true`) rather than leaving it stale from creation.
    async fn set_current_branch(&mut self, name: &str) -> BackendResult<()> {
        if self.current_branch != name {
            if let Some(mut old) = self.backend.get_branch(&self.current_branch).await? {
                old.is_current = false;
                self.backend.put_branch(old).await?;
            }
        }
        if let Some(mut new_current) = self.backend.get_branch(name).await? {
            new_current.is_current = true;
            self.backend.put_branch(new_current).await?;
        }
        self.current_branch = name.to_string();
        Ok(())
    }

    /// `checkpoint(state, metadata, description, logic_step)` — `spec.md` §4.D.
    ///
    /// Validates `state`/`metadata` are representable before anything
    /// touches the backend: on a [`SerializationError`](crate::serializer::SerializationError)
    /// the DAG is left completely unmutated (`spec.md` §4.A/§7).
    #[instrument(skip(self, state, metadata))]
    pub async fn checkpoint(
        &mut self,
        state: Value,
        metadata: FxHashMap<String, Value>,
        description: impl Into<String>,
        logic_step: impl Into<String>,
    ) -> Result<Checkpoint, CheckpointError> {
        let logic_step = logic_step.into();
        let mut branch = self.require_branch(&self.current_branch.clone()).await?;

        let metadata_value = Value::Map(metadata.clone());
        self.serializer.encode(&state)?;
        self.serializer.encode(&metadata_value)?;
        let fp = Serializer::fingerprint(&state, &metadata_value, &logic_step);

        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            state,
            metadata,
            description: description.into(),
            logic_step,
            branch: branch.name.clone(),
            parent_id: branch.head_id.clone(),
            status: CheckpointStatus::Active,
            fingerprint: fp,
        };

        self.backend.put(checkpoint.clone()).await?;
        branch.head_id = Some(checkpoint.id.clone());
        self.backend.put_branch(branch).await?;
        Ok(checkpoint)
    }

    /// Ancestor chain of `id`, nearest first, following `parent_id` to the
    /// root. Stops (without error) if a parent id is missing from storage.
    async fn ancestor_chain(&self, id: &str) -> BackendResult<Vec<Checkpoint>> {
        let mut chain = Vec::new();
        let mut cursor = Some(id.to_string());
        while let Some(current_id) = cursor {
            match self.backend.get(&current_id).await? {
                Some(cp) => {
                    cursor = cp.parent_id.clone();
                    chain.push(cp);
                }
                None => break,
            }
        }
        Ok(chain)
    }

    /// `rollback(steps | to_checkpoint_id) → Checkpoint` — `spec.md` §4.D.
    ///
    /// Marks every checkpoint strictly between the current head and the
    /// target `rolled_back` and moves the branch head to the target. If
    /// the target is an ancestor reached across a branch fork, the current
    /// branch cursor switches to the target's branch (resolved Open
    /// Question, see DESIGN.md).
    ///
    /// Invariant 3 (every branch head points at an active checkpoint) must
    /// hold for *every* branch afterward, not just the one we rolled back
    /// from: a sibling branch forked anywhere above the target is walked
    /// back on its own ancestor chain to wherever it first rejoins the
    /// target's ancestry, with everything above that point rolled back and
    /// the branch head repointed there.
    #[instrument(skip(self))]
    pub async fn rollback(&mut self, target: RollbackTarget) -> Result<Checkpoint, RollbackError> {
        let branch = self.require_branch(&self.current_branch.clone()).await?;
        let head_id = branch.head_id.clone().ok_or(RollbackError::EmptyBranch {
            name: branch.name.clone(),
        })?;
        let chain = self.ancestor_chain(&head_id).await?;

        let (target_index, target_id) = match target {
            RollbackTarget::Steps(steps) => {
                let idx = steps as usize;
                if idx >= chain.len() {
                    return Err(RollbackError::NotEnoughAncestors {
                        requested: steps,
                        available: chain.len().saturating_sub(1) as u32,
                    });
                }
                (idx, chain[idx].id.clone())
            }
            RollbackTarget::CheckpointId(ref id) => {
                let idx = chain
                    .iter()
                    .position(|cp| &cp.id == id)
                    .ok_or_else(|| RollbackError::UnknownTarget { id: id.clone() })?;
                (idx, id.clone())
            }
        };

        for ancestor in &chain[..target_index] {
            if ancestor.status == CheckpointStatus::Active {
                self.backend
                    .update_status(&ancestor.id, CheckpointStatus::RolledBack)
                    .await?;
            }
        }

        let target_checkpoint = chain[target_index].clone();
        let target_ancestry: std::collections::HashSet<String> = chain[target_index..]
            .iter()
            .map(|cp| cp.id.clone())
            .collect();

        // The branch we rolled back from always lands directly on the
        // target; every other branch gets its own independent walk below.
        let mut repoints: Vec<(String, String)> = vec![(branch.name.clone(), target_id.clone())];

        for existing in self.backend.list_branches().await? {
            if existing.name == branch.name {
                continue;
            }
            let Some(other_head) = existing.head_id.clone() else {
                continue;
            };
            if target_ancestry.contains(&other_head) {
                // Already at or above X; this branch needs no repointing.
                continue;
            }

            let other_chain = self.ancestor_chain(&other_head).await?;
            let mut convergence = None;
            for cp in &other_chain {
                if target_ancestry.contains(&cp.id) {
                    convergence = Some(cp.id.clone());
                    break;
                }
                if cp.status == CheckpointStatus::Active {
                    self.backend
                        .update_status(&cp.id, CheckpointStatus::RolledBack)
                        .await?;
                }
            }
            if let Some(conv) = convergence {
                repoints.push((existing.name.clone(), conv));
            }
        }

        for (name, new_head) in repoints {
            if let Some(mut b) = self.backend.get_branch(&name).await? {
                b.head_id = Some(new_head);
                self.backend.put_branch(b).await?;
            }
        }

        self.set_current_branch(&target_checkpoint.branch).await?;

        Ok(target_checkpoint)
    }

    /// `branch(name) → Branch` — forks from the current head.
    #[instrument(skip(self))]
    pub async fn branch(&mut self, name: impl Into<String>) -> Result<Branch, BranchError> {
        let name = name.into();
        if self.backend.get_branch(&name).await?.is_some() {
            return Err(BranchError::AlreadyExists { name });
        }
        let current = self.require_branch(&self.current_branch.clone()).await?;
        let new_branch = Branch {
            name: name.clone(),
            head_id: current.head_id.clone(),
            created_from: current.head_id.clone(),
            is_current: true,
        };
        self.backend.put_branch(new_branch.clone()).await?;
        self.set_current_branch(&name).await?;
        Ok(new_branch)
    }

    /// `switch_branch(name)` — updates the current-branch cursor.
    pub async fn switch_branch(&mut self, name: impl Into<String>) -> Result<(), BranchError> {
        let name = name.into();
        self.require_branch(&name)
            .await
            .map_err(|_| BranchError::UnknownBranch { name: name.clone() })?;
        self.set_current_branch(&name).await?;
        Ok(())
    }

    /// `merge(source_branch, strategy) → Checkpoint` — `spec.md` §4.D.
    #[instrument(skip(self))]
    pub async fn merge(
        &mut self,
        source_branch: &str,
        strategy: MergeStrategy,
    ) -> Result<Checkpoint, MergeError> {
        merge::merge(self, source_branch, strategy).await
    }

    /// `diff(id_a, id_b) → Diff` — `spec.md` §4.D.
    pub async fn diff(&self, id_a: &str, id_b: &str) -> Result<Diff, StorageError> {
        let a = self
            .backend
            .get(id_a)
            .await?
            .ok_or_else(|| StorageError::NotFound { id: id_a.to_string() })?;
        let b = self
            .backend
            .get(id_b)
            .await?
            .ok_or_else(|| StorageError::NotFound { id: id_b.to_string() })?;
        Ok(diff::diff_states(&a.state, &b.state))
    }

    /// `history(limit, branch?) → sequence` — timestamp-ascending.
    ///
    /// A `branch` filter walks that branch's own ancestor chain from its
    /// current head rather than matching `Checkpoint.branch` flatly: after
    /// [`Self::rollback`] repoints a branch's head onto an ancestor created
    /// on a different branch, that ancestor must show up as part of this
    /// branch's history, not just the branch it was originally created on.
    pub async fn history(
        &self,
        limit: usize,
        branch: Option<&str>,
    ) -> BackendResult<Vec<Checkpoint>> {
        match branch {
            None => {
                let mut all = self.backend.list(Filter::default()).await?;
                all.truncate(limit);
                Ok(all)
            }
            Some(name) => {
                let Some(b) = self.backend.get_branch(name).await? else {
                    return Ok(Vec::new());
                };
                let Some(head_id) = b.head_id else {
                    return Ok(Vec::new());
                };
                let mut chain = self.ancestor_chain(&head_id).await?;
                chain.reverse();
                chain.truncate(limit);
                Ok(chain)
            }
        }
    }

    /// All checkpoints across all branches, for [`crate::session::Session::export_session`].
    pub async fn all_checkpoints(&self) -> BackendResult<Vec<Checkpoint>> {
        self.backend.list(Filter::default()).await
    }

    /// All branches, for [`crate::session::Session::export_session`].
    pub async fn all_branches(&self) -> BackendResult<Vec<Branch>> {
        self.backend.list_branches().await
    }

    /// Write a checkpoint directly to the backend, bypassing id/parent
    /// derivation. Used only by [`crate::session::Session::import_session`]
    /// to replay an exported document.
    pub async fn restore_checkpoint(&self, checkpoint: Checkpoint) -> BackendResult<()> {
        self.backend.put(checkpoint).await
    }

    /// Write a branch directly to the backend. See [`Self::restore_checkpoint`].
    pub async fn restore_branch(&self, branch: Branch) -> BackendResult<()> {
        self.backend.put_branch(branch).await
    }

    /// Erase all checkpoints and branches, then recreate an empty `main`.
    /// Used by [`crate::session::Session::import_session`] before replay.
    pub async fn reset(&mut self) -> BackendResult<()> {
        self.backend.clear().await?;
        self.backend.put_branch(Branch::root(Branch::MAIN)).await?;
        self.current_branch = Branch::MAIN.to_string();
        Ok(())
    }

    /// `visualize_tree() → string` — not a compatibility surface.
    pub async fn visualize_tree(&self) -> BackendResult<String> {
        let all = self.backend.list(Filter::default()).await?;
        let mut out = String::new();
        for cp in &all {
            let glyph = match cp.status {
                CheckpointStatus::Active => '*',
                CheckpointStatus::RolledBack => 'x',
                CheckpointStatus::Merged => '+',
            };
            let desc: String = cp.description.chars().take(45).collect();
            out.push_str(&format!(
                "{glyph} [{}] {} ({})\n",
                &cp.id[..cp.id.len().min(8)],
                desc,
                cp.branch
            ));
        }
        Ok(out)
    }
}
