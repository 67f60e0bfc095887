//! The session façade (`spec.md` §4.F): the single entry point aggregating
//! the serializer, a backend, the DAG engine, and the orchestrator behind
//! one lock, matching `spec.md` §5's single-writer model.

use std::future::Future;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::memory::MemoryBackend;
use crate::backend::{Backend, Result as BackendResult, StorageError};
#[cfg(feature = "sqlite")]
use crate::backend::sqlite::SqliteBackend;
use crate::backend::file_tree::FileTreeBackend;
use crate::checkpoint::{Branch, Checkpoint};
use crate::config::{BackendChoice, SessionConfig};
use crate::dag::{
    BranchError, CheckpointError, DagEngine, Diff, MergeError, MergeStrategy, RollbackError,
    RollbackTarget,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::orchestrator::{self, CancellationToken, ExecutionError};
use crate::recovery::RecoveryStrategy;
use crate::value::Value;

/// Version tag for [`ExportDocument`] (`spec.md` §6).
pub const EXPORT_VERSION: u32 = 1;

/// `export_session()`'s output shape (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: u32,
    pub agent_name: String,
    pub current_branch: String,
    pub checkpoints: Vec<Checkpoint>,
    pub branches: Vec<Branch>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ImportError {
    #[error("unsupported export document version {found}, expected {EXPORT_VERSION}")]
    #[diagnostic(code(mindtrace::session::import::version))]
    UnsupportedVersion { found: u32 },

    #[error("export document's current_branch {name} has no matching branch entry")]
    #[diagnostic(code(mindtrace::session::import::dangling_current_branch))]
    DanglingCurrentBranch { name: String },

    #[error("checkpoint {id} references unknown parent {parent_id}")]
    #[diagnostic(
        code(mindtrace::session::import::dangling_parent),
        help("Every checkpoint's parent_id must itself appear in the document's checkpoints list.")
    )]
    DanglingParent { id: String, parent_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Import(#[from] ImportError),
}

/// The top-level container owning checkpoints, branches, and a backend
/// (glossary: **Session**). Cheaply cloneable (`Arc`-backed internals) so
/// multiple call sites can share one handle; all mutating operations still
/// serialize through the internal lock.
#[derive(Clone)]
pub struct Session {
    agent_name: Arc<str>,
    engine: Arc<Mutex<DagEngine>>,
    metrics: Arc<Metrics>,
    default_max_retries: u32,
}

impl Session {
    /// Start configuring a session for `agent_name`. Thin alias for
    /// [`SessionConfig::new`] so callers can write
    /// `Session::builder("agent").with_memory_backend()` without a second
    /// `use` for [`SessionConfig`].
    #[must_use]
    pub fn builder(agent_name: impl Into<String>) -> SessionConfig {
        SessionConfig::new(agent_name)
    }

    /// Open a session per `config`, constructing the chosen backend and
    /// priming the DAG engine's `main` branch.
    pub async fn open(config: SessionConfig) -> Result<Self, SessionError> {
        let backend: Arc<dyn Backend> = match config.backend {
            BackendChoice::Memory => Arc::new(MemoryBackend::new()),
            BackendChoice::FileTree { root } => Arc::new(FileTreeBackend::new(root)),
            #[cfg(feature = "sqlite")]
            BackendChoice::Sqlite { database_url } => Arc::new(
                SqliteBackend::connect_with_flavor(&database_url, config.serializer_flavor)
                    .await
                    .map_err(StorageError::from)?,
            ),
        };
        let engine = DagEngine::open_with_flavor(backend, config.serializer_flavor).await?;
        Ok(Self {
            agent_name: config.agent_name.into(),
            engine: Arc::new(Mutex::new(engine)),
            metrics: Arc::new(Metrics::new()),
            default_max_retries: config.retry_defaults.max_attempts,
        })
    }

    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// This session's underlying engine handle, for callers building on
    /// [`crate::guard::guarded`] or [`crate::middleware::Middleware`]
    /// directly — sharing this handle keeps them on the same single-writer
    /// mutex as every `Session` method, instead of standing up a second,
    /// unsynchronized `DagEngine` over the same backend.
    #[must_use]
    pub fn engine_handle(&self) -> Arc<Mutex<DagEngine>> {
        Arc::clone(&self.engine)
    }

    /// This session's metrics handle, for the same reason as
    /// [`Self::engine_handle`].
    #[must_use]
    pub fn metrics_handle(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn checkpoint(
        &self,
        state: Value,
        metadata: FxHashMap<String, Value>,
        description: impl Into<String>,
        logic_step: impl Into<String>,
    ) -> Result<Checkpoint, CheckpointError> {
        let mut engine = self.engine.lock().await;
        let cp = engine
            .checkpoint(state, metadata, description, logic_step)
            .await?;
        self.metrics.checkpoint_created();
        Ok(cp)
    }

    pub async fn rollback(&self, target: RollbackTarget) -> Result<Checkpoint, RollbackError> {
        let mut engine = self.engine.lock().await;
        let cp = engine.rollback(target).await?;
        self.metrics.rollback();
        Ok(cp)
    }

    pub async fn branch(&self, name: impl Into<String>) -> Result<Branch, BranchError> {
        let mut engine = self.engine.lock().await;
        let b = engine.branch(name).await?;
        self.metrics.branch_created();
        Ok(b)
    }

    pub async fn switch_branch(&self, name: impl Into<String>) -> Result<(), BranchError> {
        let mut engine = self.engine.lock().await;
        engine.switch_branch(name).await
    }

    pub async fn merge(
        &self,
        source_branch: &str,
        strategy: MergeStrategy,
    ) -> Result<Checkpoint, MergeError> {
        let mut engine = self.engine.lock().await;
        engine.merge(source_branch, strategy).await
    }

    pub async fn diff(&self, id_a: &str, id_b: &str) -> Result<Diff, StorageError> {
        let engine = self.engine.lock().await;
        engine.diff(id_a, id_b).await
    }

    pub async fn history(&self, limit: usize, branch: Option<&str>) -> BackendResult<Vec<Checkpoint>> {
        let engine = self.engine.lock().await;
        engine.history(limit, branch).await
    }

    pub async fn visualize_tree(&self) -> BackendResult<String> {
        let engine = self.engine.lock().await;
        engine.visualize_tree().await
    }

    /// `safe_execute` (`spec.md` §4.E), `max_retries` defaulting to this
    /// session's configured [`crate::config::RetryDefaults::max_attempts`]
    /// when `None`.
    #[allow(clippy::too_many_arguments)]
    pub async fn safe_execute<F, Fut, FB, FutB>(
        &self,
        strategies: &[Box<dyn RecoveryStrategy>],
        state: Value,
        description: &str,
        max_retries: Option<u32>,
        func: F,
        fallback: Option<FB>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<(Value, Checkpoint), ExecutionError>
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
        FB: Fn(Value) -> FutB,
        FutB: Future<Output = Result<Value, String>>,
    {
        let mut engine = self.engine.lock().await;
        orchestrator::safe_execute(
            &mut engine,
            strategies,
            state,
            description,
            max_retries.unwrap_or(self.default_max_retries),
            func,
            fallback,
            cancellation,
            &self.metrics,
        )
        .await
    }

    /// Read-only snapshot of this session's counters (`spec.md` §4.F).
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// `export_session() → serialisable document` (`spec.md` §4.F / §6).
    pub async fn export_session(&self) -> BackendResult<ExportDocument> {
        let engine = self.engine.lock().await;
        Ok(ExportDocument {
            version: EXPORT_VERSION,
            agent_name: self.agent_name.to_string(),
            current_branch: engine.current_branch().to_string(),
            checkpoints: engine.all_checkpoints().await?,
            branches: engine.all_branches().await?,
        })
    }

    /// `import_session(document) → Session` (`spec.md` §4.F / §6):
    /// validates the document before replaying it, rejecting malformed
    /// input with [`ImportError`] rather than leaving the backend
    /// half-populated.
    pub async fn import_session(
        config: SessionConfig,
        document: ExportDocument,
    ) -> Result<Self, ImportError> {
        if document.version != EXPORT_VERSION {
            return Err(ImportError::UnsupportedVersion {
                found: document.version,
            });
        }
        if !document
            .branches
            .iter()
            .any(|b| b.name == document.current_branch)
        {
            return Err(ImportError::DanglingCurrentBranch {
                name: document.current_branch.clone(),
            });
        }
        let known_ids: std::collections::HashSet<&str> =
            document.checkpoints.iter().map(|c| c.id.as_str()).collect();
        for cp in &document.checkpoints {
            if let Some(parent_id) = &cp.parent_id {
                if !known_ids.contains(parent_id.as_str()) {
                    return Err(ImportError::DanglingParent {
                        id: cp.id.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
            }
        }

        let session = Self::open(config)
            .await
            .map_err(|e| match e {
                SessionError::Storage(s) => ImportError::Storage(s),
                other => ImportError::Storage(StorageError::Backend(other.to_string())),
            })?;

        {
            let mut engine = session.engine.lock().await;
            engine.reset().await?;
            for cp in document.checkpoints {
                engine.restore_checkpoint(cp).await?;
            }
            for branch in document.branches {
                engine.restore_branch(branch).await?;
            }
            engine.set_current_branch_unchecked(document.current_branch);
        }

        Ok(session)
    }
}
