//! Checkpoint id allow-list and filesystem path guard.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::fs;

use crate::error::CheckpointError;

static CHECKPOINT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("checkpoint id pattern is valid")
});

pub(crate) const JSON_EXT: &str = ".json";
pub(crate) const GZIP_EXT: &str = ".json.gz";
pub(crate) const INDEX_FILE: &str = "index.json";

/// Check `id` against the lowercase UUID-v4 pattern that limits the on-disk
/// filename namespace.
pub fn validate_checkpoint_id(id: &str) -> Result<(), CheckpointError> {
    if CHECKPOINT_ID.is_match(id) {
        Ok(())
    } else {
        Err(CheckpointError::path(id, "invalid checkpoint id format (expected UUID v4)"))
    }
}

/// File name for a checkpoint id in either storage format.
pub(crate) fn checkpoint_file_name(id: &str, compressed: bool) -> String {
    if compressed {
        format!("{}{}", id, GZIP_EXT)
    } else {
        format!("{}{}", id, JSON_EXT)
    }
}

/// Split a directory entry name into `(id, compressed)` if it names a checkpoint.
pub(crate) fn parse_checkpoint_file_name(name: &str) -> Option<(&str, bool)> {
    let (stem, compressed) = if let Some(stem) = name.strip_suffix(GZIP_EXT) {
        (stem, true)
    } else {
        (name.strip_suffix(JSON_EXT)?, false)
    };
    CHECKPOINT_ID.is_match(stem).then_some((stem, compressed))
}

/// Confines file access to one directory.
///
/// Every resolution re-checks containment and symlinks, so callers resolve
/// immediately before each filesystem touch rather than caching paths.
#[derive(Debug, Clone)]
pub(crate) struct PathGuard {
    base: PathBuf,
}

impl PathGuard {
    /// `base` should already be canonicalized.
    pub(crate) fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub(crate) fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve `file_name` inside the base directory on behalf of `id`.
    pub(crate) async fn resolve(&self, id: &str, file_name: &str) -> Result<PathBuf, CheckpointError> {
        let mut components = Path::new(file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(CheckpointError::path(
                    id,
                    format!("'{}' is not a plain file name", file_name),
                ));
            }
        }

        let path = self.base.join(file_name);
        if path.parent() != Some(self.base.as_path()) {
            return Err(CheckpointError::path(id, "resolved path escapes the checkpoint directory"));
        }

        reject_symlink(id, &self.base, "checkpoint directory").await?;
        reject_symlink(id, &path, "checkpoint file").await?;

        Ok(path)
    }
}

async fn reject_symlink(id: &str, path: &Path, what: &str) -> Result<(), CheckpointError> {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => Err(CheckpointError::path(
            id,
            format!("{} {} is a symlink", what, path.display()),
        )),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
