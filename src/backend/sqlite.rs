//! Embedded relational backend (`spec.md` §4.B / §6), two tables:
//! `checkpoints` and `branches`. All writes run inside a transaction; reads
//! use the shared pool serially, matching `spec.md` §4.B's "single
//! connection serially" requirement in spirit (sqlx's pool still hands out
//! one connection per query, but this backend never overlaps two writers
//! because [`super::Backend`] callers are themselves single-writer per
//! `spec.md` §5).
//!
//! Grounded on `weavegraph::runtimes::checkpointer_sqlite::SQLiteCheckpointer`:
//! same transaction-wrapped-write shape, same row<->struct mapping style.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use super::{Backend, Filter, Result, StorageError};
use crate::checkpoint::{Branch, Checkpoint, CheckpointStatus};
use crate::serializer::{Serializer, SerializerFlavor};
use crate::value::Value;
use async_trait::async_trait;
use tracing::instrument;

fn status_to_str(s: CheckpointStatus) -> &'static str {
    match s {
        CheckpointStatus::Active => "active",
        CheckpointStatus::RolledBack => "rolled_back",
        CheckpointStatus::Merged => "merged",
    }
}

fn status_from_str(s: &str) -> Result<CheckpointStatus> {
    match s {
        "active" => Ok(CheckpointStatus::Active),
        "rolled_back" => Ok(CheckpointStatus::RolledBack),
        "merged" => Ok(CheckpointStatus::Merged),
        other => Err(StorageError::Serde(format!("unknown status {other}"))),
    }
}

/// SQLite-backed durable storage for checkpoints and branches.
pub struct SqliteBackend {
    pool: SqlitePool,
    serializer: Serializer,
}

impl SqliteBackend {
    /// Connect (or create) a SQLite database at `database_url`, e.g.
    /// `"sqlite://mindtrace.db"` or `"sqlite::memory:"`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with_flavor(database_url, SerializerFlavor::Binary).await
    }

    pub async fn connect_with_flavor(
        database_url: &str,
        flavor: SerializerFlavor,
    ) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("connect: {e}")))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Backend(format!("migrate: {e}")))?;
        Ok(Self {
            pool,
            serializer: Serializer::new(flavor),
        })
    }

    fn metadata_to_value(metadata: &rustc_hash::FxHashMap<String, Value>) -> Value {
        Value::Map(metadata.clone())
    }

    fn value_to_metadata(v: Value) -> Result<rustc_hash::FxHashMap<String, Value>> {
        match v {
            Value::Map(m) => Ok(m),
            _ => Err(StorageError::Serde("metadata blob not a map".to_string())),
        }
    }

    async fn row_to_checkpoint(&self, row: &SqliteRow) -> Result<Checkpoint> {
        let id: String = row.get("id");
        let branch: String = row.get("branch");
        let parent_id: Option<String> = row.get("parent_id");
        let status_str: String = row.get("status");
        let timestamp_str: String = row.get("timestamp");
        let logic_step: String = row.get("logic_step");
        let description: String = row.get("description");
        let metadata_blob: Vec<u8> = row.get("metadata_blob");
        let state_blob: Vec<u8> = row.get("state_blob");
        let fingerprint: String = row.get("fingerprint");

        let state = self
            .serializer
            .decode(&state_blob)
            .map_err(|e| StorageError::Serde(e.to_string()))?;
        let metadata_value = self
            .serializer
            .decode(&metadata_blob)
            .map_err(|e| StorageError::Serde(e.to_string()))?;
        let metadata = Self::value_to_metadata(metadata_value)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::Serde(e.to_string()))?;

        Ok(Checkpoint {
            id,
            timestamp,
            state,
            metadata,
            description,
            logic_step,
            branch,
            parent_id,
            status: status_from_str(&status_str)?,
            fingerprint,
        })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    #[instrument(skip(self, checkpoint), fields(id = %checkpoint.id))]
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let state_blob = self
            .serializer
            .encode(&checkpoint.state)
            .map_err(|e| StorageError::Serde(e.to_string()))?;
        let metadata_blob = self
            .serializer
            .encode(&Self::metadata_to_value(&checkpoint.metadata))
            .map_err(|e| StorageError::Serde(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(format!("tx begin: {e}")))?;

        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) + 1 FROM checkpoints")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(format!("seq read: {e}")))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints
                (id, branch, parent_id, status, timestamp, logic_step, description, metadata_blob, state_blob, fingerprint, seq)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.branch)
        .bind(&checkpoint.parent_id)
        .bind(status_to_str(checkpoint.status))
        .bind(checkpoint.timestamp.to_rfc3339())
        .bind(&checkpoint.logic_step)
        .bind(&checkpoint.description)
        .bind(&metadata_blob)
        .bind(&state_blob)
        .bind(&checkpoint.fingerprint)
        .bind(next_seq)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(format!("insert checkpoint: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(format!("tx commit: {e}")))
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("select: {e}")))?;
        match row {
            Some(r) => Ok(Some(self.row_to_checkpoint(&r).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: Filter) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query("SELECT * FROM checkpoints ORDER BY timestamp ASC, seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("list: {e}")))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let cp = self.row_to_checkpoint(row).await?;
            if filter_matches(&filter, &cp) {
                out.push(cp);
            }
        }
        Ok(out)
    }

    async fn update_status(&self, id: &str, new_status: CheckpointStatus) -> Result<()> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })?;
        if !current.status.can_transition_to(new_status) {
            return Err(StorageError::IllegalTransition {
                from: current.status,
                to: new_status,
            });
        }
        sqlx::query("UPDATE checkpoints SET status = ?1 WHERE id = ?2")
            .bind(status_to_str(new_status))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("update status: {e}")))?;
        Ok(())
    }

    async fn put_branch(&self, branch: Branch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO branches (name, head_id, created_from, is_current)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&branch.name)
        .bind(&branch.head_id)
        .bind(&branch.created_from)
        .bind(branch.is_current as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("insert branch: {e}")))?;
        Ok(())
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let row = sqlx::query("SELECT * FROM branches WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("select branch: {e}")))?;
        Ok(row.map(row_to_branch))
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let rows = sqlx::query("SELECT * FROM branches")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("list branches: {e}")))?;
        Ok(rows.into_iter().map(row_to_branch).collect())
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM branches WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("delete branch: {e}")))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(format!("tx begin: {e}")))?;
        sqlx::query("DELETE FROM checkpoints")
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(format!("clear checkpoints: {e}")))?;
        sqlx::query("DELETE FROM branches")
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(format!("clear branches: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(format!("tx commit: {e}")))
    }
}

fn row_to_branch(row: SqliteRow) -> Branch {
    Branch {
        name: row.get("name"),
        head_id: row.get("head_id"),
        created_from: row.get("created_from"),
        is_current: row.get::<i64, _>("is_current") != 0,
    }
}

fn filter_matches(filter: &Filter, cp: &Checkpoint) -> bool {
    if let Some(b) = &filter.branch {
        if &cp.branch != b {
            return false;
        }
    }
    if let Some(s) = filter.status {
        if cp.status != s {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if cp.timestamp < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if cp.timestamp > until {
            return false;
        }
    }
    true
}
