//! Directory-rooted backend (`spec.md` §6 on-disk layout):
//!
//! ```text
//! <root>/
//!   index.json            # {"ids":[…creation order…], "version":1}
//!   checkpoints/<id>.json
//!   branches/<name>.json
//! ```
//!
//! Writes are atomic: write-temp, fsync the temp file, rename over the
//! target, then fsync the containing directory — the extra directory fsync
//! (beyond the spec's bare "write-temp-then-rename") is grounded in
//! `other_examples/groblegark-oddjobs`'s checkpoint writer, whose comment
//! states the invariant plainly: the rename itself isn't durable until the
//! directory entry is fsynced too.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

use super::{Backend, Filter, Result, StorageError, apply_filter_and_sort};
use crate::checkpoint::{Branch, Checkpoint, CheckpointStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexFile {
    ids: Vec<String>,
    version: u32,
}

/// Backend rooted at a configurable directory. Directory creation is lazy
/// but must succeed before the first `put` (`spec.md` §4.B).
pub struct FileTreeBackend {
    root: PathBuf,
    // Single-writer guard: all mutating operations on this backend handle
    // serialize through this lock, matching spec.md §5's single-writer
    // scheduling model.
    write_lock: AsyncMutex<()>,
}

impl FileTreeBackend {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    fn branches_dir(&self) -> PathBuf {
        self.root.join("branches")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("{id}.json"))
    }

    fn branch_path(&self, name: &str) -> PathBuf {
        self.branches_dir().join(format!("{name}.json"))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.checkpoints_dir())
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        fs::create_dir_all(self.branches_dir())
            .await
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    /// Write `bytes` to `path` atomically: temp file -> fsync -> rename ->
    /// fsync parent directory.
    async fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let file = fs::File::create(&tmp_path)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            let mut file = file;
            use tokio::io::AsyncWriteExt;
            file.write_all(bytes)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
            file.sync_all()
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if let Ok(dir) = fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Serde(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    /// Load `index.json`, repairing it from the contents of `checkpoints/`
    /// when it is missing or out of sync (Open Question resolved in
    /// DESIGN.md: repair, don't fail).
    #[instrument(skip(self))]
    async fn load_index_repairing(&self) -> Result<Vec<String>> {
        let on_disk = self.read_json::<IndexFile>(&self.index_path()).await?;

        let mut actual_ids = Vec::new();
        let mut dir = match fs::read_dir(self.checkpoints_dir()).await {
            Ok(d) => Some(d),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };
        if let Some(dir) = &mut dir {
            while let Some(entry) = dir
                .next_entry()
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                    if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                        actual_ids.push(stem.to_string());
                    }
                }
            }
        }

        let needs_repair = match &on_disk {
            None => !actual_ids.is_empty(),
            Some(idx) => {
                let mut a = idx.ids.clone();
                let mut b = actual_ids.clone();
                a.sort();
                b.sort();
                a != b
            }
        };

        if !needs_repair {
            return Ok(on_disk.map(|i| i.ids).unwrap_or_default());
        }

        warn!(
            root = %self.root.display(),
            "index.json out of sync with checkpoints/ contents; rebuilding from disk"
        );

        let mut with_ts = Vec::new();
        for id in &actual_ids {
            if let Some(cp) = self
                .read_json::<Checkpoint>(&self.checkpoint_path(id))
                .await?
            {
                with_ts.push((cp.timestamp, id.clone()));
            }
        }
        with_ts.sort_by(|a, b| a.0.cmp(&b.0));
        let rebuilt: Vec<String> = with_ts.into_iter().map(|(_, id)| id).collect();

        let rebuilt_index = IndexFile {
            ids: rebuilt.clone(),
            version: 1,
        };
        let bytes = serde_json::to_vec_pretty(&rebuilt_index)
            .map_err(|e| StorageError::Serde(e.to_string()))?;
        self.atomic_write(&self.index_path(), &bytes).await?;

        Ok(rebuilt)
    }
}

#[async_trait]
impl Backend for FileTreeBackend {
    #[instrument(skip(self, checkpoint), fields(id = %checkpoint.id))]
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dirs().await?;

        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| StorageError::Serde(e.to_string()))?;
        self.atomic_write(&self.checkpoint_path(&checkpoint.id), &bytes)
            .await?;

        let mut ids = self.load_index_repairing().await?;
        if !ids.contains(&checkpoint.id) {
            ids.push(checkpoint.id.clone());
        }
        let index = IndexFile { ids, version: 1 };
        let bytes =
            serde_json::to_vec_pretty(&index).map_err(|e| StorageError::Serde(e.to_string()))?;
        self.atomic_write(&self.index_path(), &bytes).await
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>> {
        self.read_json(&self.checkpoint_path(id)).await
    }

    async fn list(&self, filter: Filter) -> Result<Vec<Checkpoint>> {
        let ids = self.load_index_repairing().await?;
        let mut numbered = Vec::with_capacity(ids.len());
        for (seq, id) in ids.iter().enumerate() {
            if let Some(cp) = self.get(id).await? {
                numbered.push((seq as u64, cp));
            }
        }
        Ok(apply_filter_and_sort(numbered, &filter))
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: &str, new_status: CheckpointStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut cp = self
            .get(id)
            .await?
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })?;
        if !cp.status.can_transition_to(new_status) {
            return Err(StorageError::IllegalTransition {
                from: cp.status,
                to: new_status,
            });
        }
        cp.status = new_status;
        let bytes = serde_json::to_vec_pretty(&cp).map_err(|e| StorageError::Serde(e.to_string()))?;
        self.atomic_write(&self.checkpoint_path(id), &bytes).await
    }

    async fn put_branch(&self, branch: Branch) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dirs().await?;
        let bytes =
            serde_json::to_vec_pretty(&branch).map_err(|e| StorageError::Serde(e.to_string()))?;
        self.atomic_write(&self.branch_path(&branch.name), &bytes)
            .await
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        self.read_json(&self.branch_path(name)).await
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let mut out = Vec::new();
        let dir_path = self.branches_dir();
        let mut dir = match fs::read_dir(&dir_path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(branch) = self.read_json::<Branch>(&entry.path()).await? {
                    out.push(branch);
                }
            }
        }
        Ok(out)
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.branch_path(name)).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let _ = fs::remove_dir_all(&self.root).await;
        self.ensure_dirs().await
    }
}
