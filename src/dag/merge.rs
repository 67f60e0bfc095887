use chrono::Utc;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::{DagEngine, MergeError};
use crate::checkpoint::{Checkpoint, CheckpointStatus};
use crate::serializer::Serializer;
use crate::value::{Value, shallow_override};

/// Merge strategies from `spec.md` §4.D's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Whichever head has the greater `metadata.confidence` wins whole;
    /// ties favor the current branch's head.
    PreferHigherConfidence,
    /// Shallow key-union; current branch wins on key conflicts.
    Combine,
    /// Source head's state verbatim.
    PreferSource,
    /// Current head's state verbatim.
    PreferTarget,
}

fn merged_state(strategy: MergeStrategy, current: &Checkpoint, source: &Checkpoint) -> Value {
    match strategy {
        MergeStrategy::PreferSource => source.state.clone(),
        MergeStrategy::PreferTarget => current.state.clone(),
        MergeStrategy::Combine => shallow_override(&source.state, &current.state),
        MergeStrategy::PreferHigherConfidence => {
            let current_conf = current.confidence().unwrap_or(f64::MIN);
            let source_conf = source.confidence().unwrap_or(f64::MIN);
            if source_conf > current_conf {
                source.state.clone()
            } else {
                current.state.clone()
            }
        }
    }
}

pub(super) async fn merge(
    engine: &mut DagEngine,
    source_branch: &str,
    strategy: MergeStrategy,
) -> Result<Checkpoint, MergeError> {
    let mut current_branch = engine.require_branch(&engine.current_branch.clone()).await?;
    let current_head_id =
        current_branch
            .head_id
            .clone()
            .ok_or_else(|| MergeError::EmptyBranch {
                name: current_branch.name.clone(),
            })?;

    let source = engine
        .backend
        .get_branch(source_branch)
        .await?
        .ok_or_else(|| MergeError::UnknownBranch {
            name: source_branch.to_string(),
        })?;
    let source_head_id = source.head_id.clone().ok_or_else(|| MergeError::EmptyBranch {
        name: source_branch.to_string(),
    })?;

    let current_head = engine
        .backend
        .get(&current_head_id)
        .await?
        .ok_or_else(|| MergeError::EmptyBranch {
            name: current_branch.name.clone(),
        })?;
    let source_head = engine
        .backend
        .get(&source_head_id)
        .await?
        .ok_or_else(|| MergeError::EmptyBranch {
            name: source_branch.to_string(),
        })?;

    let state = merged_state(strategy, &current_head, &source_head);

    let mut metadata = FxHashMap::default();
    metadata.insert(
        Checkpoint::META_MERGED_FROM.to_string(),
        Value::String(source_head_id.clone()),
    );
    let metadata_value = Value::Map(metadata.clone());
    let logic_step = "merge".to_string();
    engine.serializer.encode(&state)?;
    engine.serializer.encode(&metadata_value)?;
    let fp = Serializer::fingerprint(&state, &metadata_value, &logic_step);

    let merge_checkpoint = Checkpoint {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        state,
        metadata,
        description: format!("merge {source_branch} into {}", current_branch.name),
        logic_step,
        branch: current_branch.name.clone(),
        parent_id: Some(current_head_id.clone()),
        status: CheckpointStatus::Active,
        fingerprint: fp,
    };

    engine.backend.put(merge_checkpoint.clone()).await?;
    engine
        .backend
        .update_status(&current_head_id, CheckpointStatus::Merged)
        .await?;
    engine
        .backend
        .update_status(&source_head_id, CheckpointStatus::Merged)
        .await?;

    current_branch.head_id = Some(merge_checkpoint.id.clone());
    engine.backend.put_branch(current_branch).await?;

    Ok(merge_checkpoint)
}
