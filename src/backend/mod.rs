//! Persistence backend interface (`spec.md` §4.B) and its three
//! implementations: [`memory::MemoryBackend`], [`file_tree::FileTreeBackend`],
//! and, behind the `sqlite` feature, [`sqlite::SqliteBackend`].
//!
//! All three must yield identical observable behavior for the same
//! operation sequence (Testable Property 5) — `tests/backend_conformance.rs`
//! runs one shared suite against all three.

pub mod file_tree;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::{Branch, Checkpoint, CheckpointStatus};

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("checkpoint not found: {id}")]
    #[diagnostic(code(mindtrace::backend::not_found))]
    NotFound { id: String },

    #[error("branch not found: {name}")]
    #[diagnostic(code(mindtrace::backend::branch_not_found))]
    BranchNotFound { name: String },

    #[error("illegal status transition: {from:?} -> {to:?}")]
    #[diagnostic(
        code(mindtrace::backend::illegal_transition),
        help("Status transitions are one-way: active -> rolled_back | merged.")
    )]
    IllegalTransition {
        from: CheckpointStatus,
        to: CheckpointStatus,
    },

    #[error("i/o error: {0}")]
    #[diagnostic(code(mindtrace::backend::io))]
    Io(String),

    #[error("serialization error: {0}")]
    #[diagnostic(code(mindtrace::backend::serde))]
    Serde(String),

    #[error("backend error: {0}")]
    #[diagnostic(code(mindtrace::backend::other))]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Restricts [`Backend::list`] results by branch, status, and/or time range.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub branch: Option<String>,
    pub status: Option<CheckpointStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl Filter {
    #[must_use]
    pub fn branch(mut self, name: impl Into<String>) -> Self {
        self.branch = Some(name.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: CheckpointStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn since(mut self, ts: DateTime<Utc>) -> Self {
        self.since = Some(ts);
        self
    }

    #[must_use]
    pub fn until(mut self, ts: DateTime<Utc>) -> Self {
        self.until = Some(ts);
        self
    }

    fn matches(&self, cp: &Checkpoint) -> bool {
        if let Some(b) = &self.branch {
            if &cp.branch != b {
                return false;
            }
        }
        if let Some(s) = self.status {
            if cp.status != s {
                return false;
            }
        }
        if let Some(since) = self.since {
            if cp.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if cp.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Durable key/sequence storage of checkpoint records, indexed by id and
/// branch. Every operation here must be idempotent under identical inputs
/// and must leave prior state untouched on error (`spec.md` §7).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Checkpoint>>;
    /// Checkpoints matching `filter`, ordered by `(timestamp, insertion
    /// index)` ascending (`spec.md` §5).
    async fn list(&self, filter: Filter) -> Result<Vec<Checkpoint>>;
    async fn update_status(&self, id: &str, new_status: CheckpointStatus) -> Result<()>;
    async fn put_branch(&self, branch: Branch) -> Result<()>;
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>>;
    async fn list_branches(&self) -> Result<Vec<Branch>>;
    async fn delete_branch(&self, name: &str) -> Result<()>;
    /// Remove all state for this backend's agent/session scope.
    async fn clear(&self) -> Result<()>;
}

pub(crate) fn apply_filter_and_sort(
    mut checkpoints: Vec<(u64, Checkpoint)>,
    filter: &Filter,
) -> Vec<Checkpoint> {
    checkpoints.sort_by(|(ia, a), (ib, b)| a.timestamp.cmp(&b.timestamp).then(ia.cmp(ib)));
    checkpoints
        .into_iter()
        .map(|(_, cp)| cp)
        .filter(|cp| filter.matches(cp))
        .collect()
}
