//! Filesystem checkpoint store.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointIndexEntry};
use crate::compression::{check_ratio, gunzip_bounded, gzip};
use crate::config::StoreConfig;
use crate::error::CheckpointError;
use crate::paths::{
    checkpoint_file_name, parse_checkpoint_file_name, validate_checkpoint_id, PathGuard,
    INDEX_FILE,
};
use crate::store::{parse_id, CheckpointStore};

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// File system based checkpoint store.
///
/// ```text
/// {base_path}/            (0700)
/// ├── index.json          (0600, advisory cache)
/// ├── {uuid}.json.gz      (0600, compression on)
/// └── {uuid}.json         (0600, compression off)
/// ```
///
/// The set of checkpoint files is ground truth; `index.json` only avoids
/// loading payloads for listings and can be rebuilt at any time.
pub struct FileCheckpointStore {
    config: StoreConfig,
    guard: PathGuard,
    index: tokio::sync::RwLock<HashMap<Uuid, CheckpointIndexEntry>>,
}

impl FileCheckpointStore {
    /// Validate `config`, create the base directory with owner-only
    /// permissions and load the index.
    ///
    /// An unreadable or malformed index is replaced by an empty one, and an
    /// index whose ids disagree with the files on disk is rebuilt.
    pub async fn new(config: StoreConfig) -> Result<Self, CheckpointError> {
        config.validate()?;

        let base = &config.base_path;
        fs::create_dir_all(base).await.map_err(|e| {
            CheckpointError::Store(format!(
                "Failed to create checkpoint directory {}: {}",
                base.display(),
                e
            ))
        })?;

        let meta = fs::symlink_metadata(base).await?;
        if meta.file_type().is_symlink() {
            return Err(CheckpointError::path(
                base.display().to_string(),
                "checkpoint directory is a symlink",
            ));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base, std::fs::Permissions::from_mode(DIR_MODE)).await?;
        }

        let canonical = fs::canonicalize(base).await?;
        let store = Self {
            config,
            guard: PathGuard::new(canonical),
            index: tokio::sync::RwLock::new(HashMap::new()),
        };
        store.load_index().await;
        store.reconcile_index().await?;

        debug!("FileCheckpointStore initialized at {:?}", store.guard.base());
        Ok(store)
    }

    /// Canonical base directory.
    pub fn base_path(&self) -> &Path {
        self.guard.base()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Re-derive the index from a directory scan and persist it.
    ///
    /// Returns the number of readable checkpoints found.
    pub async fn rebuild_index(&self) -> Result<usize, CheckpointError> {
        let loaded = self.load_all(self.scan_ids().await?).await?;
        let rebuilt: HashMap<_, _> = loaded
            .iter()
            .map(|(cp, file_name)| (cp.id, cp.index_entry(file_name.clone())))
            .collect();
        let count = rebuilt.len();

        *self.index.write().await = rebuilt;
        self.persist_index().await;

        info!("Rebuilt checkpoint index with {} entries", count);
        Ok(count)
    }

    async fn load_index(&self) {
        if !self.config.index_enabled {
            return;
        }

        let entries = match self.read_index().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Checkpoint index unusable, starting empty: {}", e);
                Vec::new()
            }
        };

        let mut index = self.index.write().await;
        for entry in entries {
            let consistent = parse_checkpoint_file_name(&entry.path)
                .is_some_and(|(stem, _)| stem == entry.id.to_string());
            if consistent {
                index.insert(entry.id, entry);
            } else {
                warn!("Ignoring index entry {} with path '{}'", entry.id, entry.path);
            }
        }
        debug!("Loaded {} checkpoint index entries", index.len());
    }

    /// Rebuild the index when its ids differ from the checkpoint files on
    /// disk, as after a crash between a checkpoint write and the index write.
    async fn reconcile_index(&self) -> Result<(), CheckpointError> {
        if !self.config.index_enabled {
            return Ok(());
        }

        let on_disk: BTreeSet<String> = self.scan_ids().await?.into_iter().collect();
        let indexed: BTreeSet<String> = self
            .index
            .read()
            .await
            .keys()
            .map(|id| id.to_string())
            .collect();
        if on_disk == indexed {
            return Ok(());
        }

        warn!(
            "Checkpoint index lists {} ids but {} are on disk, rebuilding",
            indexed.len(),
            on_disk.len()
        );
        self.rebuild_index().await?;
        Ok(())
    }

    async fn read_index(&self) -> Result<Vec<CheckpointIndexEntry>, CheckpointError> {
        let path = self.guard.resolve(INDEX_FILE, INDEX_FILE).await?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content)
            .map_err(|e| CheckpointError::corruption(INDEX_FILE, e.to_string()))
    }

    /// Write the in-memory index to disk. Failures are logged, not returned:
    /// a stale index only costs a rebuild.
    async fn persist_index(&self) {
        if !self.config.index_enabled {
            return;
        }

        let mut entries: Vec<_> = self.index.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at);

        let result = match serde_json::to_vec_pretty(&entries) {
            Ok(bytes) => self.write_private(INDEX_FILE, INDEX_FILE, &bytes).await,
            Err(e) => Err(CheckpointError::Serialization(e.to_string())),
        };
        if let Err(e) = result {
            warn!("Failed to persist checkpoint index: {}", e);
        }
    }

    /// Write `bytes` to `file_name` with owner-only permissions via a
    /// same-directory temp file and rename. The temp file is removed on
    /// every failure.
    async fn write_private(&self, id: &str, file_name: &str, bytes: &[u8]) -> Result<(), CheckpointError> {
        self.guard.resolve(id, file_name).await?;
        let tmp_name = format!(".{}.tmp", file_name);
        let tmp_path = self.guard.resolve(id, &tmp_name).await?;

        // Leftover from an interrupted write.
        match fs::remove_file(&tmp_path).await {
            Ok(()) => debug!("Removed stale temp file {}", tmp_name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let result = self.write_and_rename(id, file_name, &tmp_path, bytes).await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }

    async fn write_and_rename(
        &self,
        id: &str,
        file_name: &str,
        tmp_path: &Path,
        bytes: &[u8],
    ) -> Result<(), CheckpointError> {
        // create_new refuses anything already at the temp path, symlinks included.
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options.open(tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp_path, std::fs::Permissions::from_mode(FILE_MODE)).await?;
        }

        let path = self.guard.resolve(id, file_name).await?;
        fs::rename(tmp_path, &path).await?;
        Ok(())
    }

    /// Read and decode one checkpoint, returning it with its file name.
    async fn load(&self, id: &str) -> Result<Option<(Checkpoint, String)>, CheckpointError> {
        validate_checkpoint_id(id)?;

        // Prefer the configured format; fall back to the other so toggling
        // compression keeps older checkpoints readable.
        for compressed in [self.config.compression, !self.config.compression] {
            let file_name = checkpoint_file_name(id, compressed);

            let path = self.guard.resolve(id, &file_name).await?;
            let len = match fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            self.check_stored_size(len)?;

            let path = self.guard.resolve(id, &file_name).await?;
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            self.check_stored_size(raw.len() as u64)?;

            let checkpoint = self.decode(id, raw, compressed).await?;
            return Ok(Some((checkpoint, file_name)));
        }

        Ok(None)
    }

    fn check_stored_size(&self, len: u64) -> Result<(), CheckpointError> {
        if len > self.config.max_checkpoint_size {
            return Err(CheckpointError::Size(format!(
                "stored checkpoint is {} bytes, limit is {}",
                len, self.config.max_checkpoint_size
            )));
        }
        Ok(())
    }

    async fn decode(&self, id: &str, raw: Vec<u8>, compressed: bool) -> Result<Checkpoint, CheckpointError> {
        let stored_len = raw.len();
        let json = if compressed {
            let json = gunzip_bounded(raw, self.config.max_decompressed_size).await?;
            check_ratio(stored_len, json.len(), self.config.max_compression_ratio)?;
            json
        } else {
            raw
        };

        let mut checkpoint: Checkpoint = serde_json::from_slice(&json)
            .map_err(|e| CheckpointError::corruption(id, format!("invalid checkpoint JSON: {}", e)))?;

        if checkpoint.id.to_string() != id {
            return Err(CheckpointError::corruption(
                id,
                format!("file contains checkpoint {}", checkpoint.id),
            ));
        }

        checkpoint.metadata.checkpoint_size = stored_len as u64;
        Ok(checkpoint)
    }

    /// Checkpoint ids present on disk.
    async fn scan_ids(&self) -> Result<Vec<String>, CheckpointError> {
        // Resolving the index name re-checks the base directory itself.
        self.guard.resolve(INDEX_FILE, INDEX_FILE).await?;

        let mut ids = BTreeSet::new();
        let mut entries = fs::read_dir(self.guard.base()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some((id, _)) = name.to_str().and_then(parse_checkpoint_file_name) {
                ids.insert(id.to_string());
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Load every id, skipping missing, corrupted and oversized entries.
    /// Path violations still abort the listing.
    async fn load_all(&self, ids: Vec<String>) -> Result<Vec<(Checkpoint, String)>, CheckpointError> {
        let mut loaded = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();

        for id in ids {
            match self.load(&id).await {
                Ok(Some(found)) => loaded.push(found),
                Ok(None) => {
                    warn!("Checkpoint '{}' listed in index but missing on disk", id);
                    stale.push(id);
                }
                Err(e) if e.is_skippable_entry() => {
                    warn!("Skipping unreadable checkpoint '{}': {}", id, e);
                }
                Err(e @ CheckpointError::Size(_)) => {
                    warn!("Skipping oversized checkpoint file for '{}': {}", id, e);
                }
                Err(e) => return Err(e),
            }
        }

        if !stale.is_empty() {
            let mut index = self.index.write().await;
            for id in stale.iter().filter_map(|id| Uuid::parse_str(id).ok()) {
                index.remove(&id);
            }
        }

        loaded.sort_by_key(|(cp, _)| cp.created_at);
        Ok(loaded)
    }

    async fn listing_ids(&self) -> Result<Vec<String>, CheckpointError> {
        if self.config.index_enabled {
            let index = self.index.read().await;
            if !index.is_empty() {
                let mut entries: Vec<_> = index.values().collect();
                entries.sort_by_key(|e| e.created_at);
                return Ok(entries.iter().map(|e| e.id.to_string()).collect());
            }
        }
        self.scan_ids().await
    }

    async fn remove_if_present(&self, id: &str, file_name: &str) -> Result<bool, CheckpointError> {
        let path = self.guard.resolve(id, file_name).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError> {
        let id = checkpoint.id.to_string();
        validate_checkpoint_id(&id)?;

        let json = serde_json::to_vec(checkpoint).map_err(|e| {
            CheckpointError::Serialization(format!("Failed to serialize checkpoint: {}", e))
        })?;
        if json.len() as u64 > self.config.max_checkpoint_size {
            return Err(CheckpointError::Size(format!(
                "checkpoint {} serializes to {} bytes, limit is {}",
                id,
                json.len(),
                self.config.max_checkpoint_size
            )));
        }

        let compressed = self.config.compression;
        let bytes = if compressed { gzip(json).await? } else { json };
        checkpoint.metadata.checkpoint_size = bytes.len() as u64;

        let file_name = checkpoint_file_name(&id, compressed);
        let sibling = checkpoint_file_name(&id, !compressed);
        self.guard.resolve(&id, &sibling).await?;

        self.write_private(&id, &file_name, &bytes).await?;
        self.remove_if_present(&id, &sibling).await?;

        if self.config.index_enabled {
            self.index
                .write()
                .await
                .insert(checkpoint.id, checkpoint.index_entry(file_name.clone()));
            self.persist_index().await;
        }

        debug!(
            "Saved checkpoint '{}' ({} bytes, state {}) to {}",
            id, bytes.len(), checkpoint.workflow.current_state, file_name
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.load(id).await?.map(|(checkpoint, _)| checkpoint))
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let ids = self.listing_ids().await?;
        let loaded = self.load_all(ids).await?;
        Ok(loaded.into_iter().map(|(checkpoint, _)| checkpoint).collect())
    }

    async fn list_entries(&self) -> Result<Vec<CheckpointIndexEntry>, CheckpointError> {
        if self.config.index_enabled {
            let index = self.index.read().await;
            if !index.is_empty() {
                let mut entries: Vec<_> = index.values().cloned().collect();
                entries.sort_by_key(|e| e.created_at);
                return Ok(entries);
            }
        }

        let loaded = self.load_all(self.scan_ids().await?).await?;
        Ok(loaded
            .iter()
            .map(|(cp, file_name)| cp.index_entry(file_name.clone()))
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, CheckpointError> {
        let uuid = parse_id(id)?;

        let mut removed = false;
        for compressed in [true, false] {
            removed |= self
                .remove_if_present(id, &checkpoint_file_name(id, compressed))
                .await?;
        }

        if self.config.index_enabled && self.index.write().await.remove(&uuid).is_some() {
            self.persist_index().await;
        }

        if removed {
            debug!("Deleted checkpoint '{}'", id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "file_store_tests.rs"]
mod tests;
