//! The data model: [`Checkpoint`], [`CheckpointStatus`], and [`Branch`].
//!
//! Checkpoints are immutable once created (`spec.md` §3); the only mutation
//! permitted afterward is the one-way `status` transition
//! `active -> rolled_back | merged`.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One-way status transitions: `active -> rolled_back`, `active -> merged`.
/// Both `rolled_back` and `merged` are terminal (`spec.md` §3, §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    RolledBack,
    Merged,
}

impl CheckpointStatus {
    /// Whether transitioning from `self` to `next` is a legal one-way move.
    #[must_use]
    pub fn can_transition_to(self, next: CheckpointStatus) -> bool {
        matches!(
            (self, next),
            (CheckpointStatus::Active, CheckpointStatus::RolledBack)
                | (CheckpointStatus::Active, CheckpointStatus::Merged)
        )
    }
}

/// The atomic, immutable unit of the checkpoint DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub state: Value,
    pub metadata: FxHashMap<String, Value>,
    pub description: String,
    pub logic_step: String,
    pub branch: String,
    pub parent_id: Option<String>,
    pub status: CheckpointStatus,
    pub fingerprint: String,
}

impl Checkpoint {
    /// First-class metadata key: 0..1 real, used by `prefer_higher_confidence`.
    pub const META_CONFIDENCE: &'static str = "confidence";
    /// First-class metadata key: non-negative integer token usage.
    pub const META_TOKENS_USED: &'static str = "tokens_used";
    /// Metadata key recorded on a merge checkpoint, naming the absorbed head.
    pub const META_MERGED_FROM: &'static str = "merged_from";
    /// Metadata key recorded on a safe_execute fallback checkpoint.
    pub const META_RECOVERY: &'static str = "recovery";

    #[must_use]
    pub fn confidence(&self) -> Option<f64> {
        self.metadata.get(Self::META_CONFIDENCE).and_then(Value::as_f64)
    }
}

/// A named cursor plus fork metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub head_id: Option<String>,
    pub created_from: Option<String>,
    pub is_current: bool,
}

impl Branch {
    pub const MAIN: &'static str = "main";

    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Branch {
            name: name.into(),
            head_id: None,
            created_from: None,
            is_current: true,
        }
    }
}
