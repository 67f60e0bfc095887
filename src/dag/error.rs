use miette::Diagnostic;
use thiserror::Error;

use crate::backend::StorageError;
use crate::serializer::SerializationError;

/// Errors from [`super::DagEngine::checkpoint`]: either the payload was
/// unrepresentable (caught before anything reaches the backend) or the
/// backend itself rejected the write (`spec.md` §7).
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum RollbackError {
    #[error("branch {name} has no checkpoints to roll back")]
    #[diagnostic(code(mindtrace::dag::rollback::empty_branch))]
    EmptyBranch { name: String },

    #[error("requested {requested} ancestors but only {available} are available")]
    #[diagnostic(
        code(mindtrace::dag::rollback::not_enough_ancestors),
        help("Check history() length before calling rollback with a step count.")
    )]
    NotEnoughAncestors { requested: u32, available: u32 },

    #[error("rollback target {id} is not an ancestor of the current head")]
    #[diagnostic(code(mindtrace::dag::rollback::unknown_target))]
    UnknownTarget { id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

impl From<CheckpointError> for RollbackError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Serialization(e) => RollbackError::Serialization(e),
            CheckpointError::Storage(e) => RollbackError::Storage(e),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum BranchError {
    #[error("branch {name} already exists")]
    #[diagnostic(code(mindtrace::dag::branch::already_exists))]
    AlreadyExists { name: String },

    #[error("branch {name} does not exist")]
    #[diagnostic(code(mindtrace::dag::branch::unknown))]
    UnknownBranch { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("branch {name} does not exist")]
    #[diagnostic(code(mindtrace::dag::merge::unknown_branch))]
    UnknownBranch { name: String },

    #[error("branch {name} has no checkpoints to merge")]
    #[diagnostic(code(mindtrace::dag::merge::empty_branch))]
    EmptyBranch { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

impl From<CheckpointError> for MergeError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Serialization(e) => MergeError::Serialization(e),
            CheckpointError::Storage(e) => MergeError::Storage(e),
        }
    }
}
