//! Checkpoint errors.

use thiserror::Error;

/// Checkpoint error types.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Generic store failure (initialization, index, filesystem).
    #[error("Checkpoint store error: {0}")]
    Store(String),

    /// Invalid checkpoint id, path traversal or symlink.
    #[error("Checkpoint path rejected for '{id}': {reason}")]
    Path { id: String, reason: String },

    /// Size limit breached before or after compression, or an anomalous
    /// compression ratio.
    #[error("Checkpoint size limit exceeded: {0}")]
    Size(String),

    /// Stored bytes are not a valid checkpoint.
    #[error("Checkpoint '{id}' is corrupted: {reason}")]
    Corruption { id: String, reason: String },

    /// gzip encode/decode failure.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Semantic validation failure.
    #[error("Checkpoint '{id}' failed integrity validation: {reason}")]
    Integrity { id: String, reason: String },

    /// A restoration step failed.
    #[error("Recovery failed: {0}")]
    Recovery(String),

    /// Checkpoint not found.
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration rejected at construction.
    #[error("Invalid checkpoint configuration: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Stable machine-readable code for API and CLI layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "CHECKPOINT_STORE_ERROR",
            Self::Path { .. } => "CHECKPOINT_PATH_ERROR",
            Self::Size(_) => "CHECKPOINT_SIZE_ERROR",
            Self::Corruption { .. } => "CHECKPOINT_CORRUPTION_ERROR",
            Self::Compression(_) => "COMPRESSION_ERROR",
            Self::Integrity { .. } => "CHECKPOINT_INTEGRITY_ERROR",
            Self::Recovery(_) => "RECOVERY_ERROR",
            Self::NotFound(_) => "CHECKPOINT_NOT_FOUND",
            Self::Serialization(_) => "CHECKPOINT_SERIALIZATION_ERROR",
            Self::InvalidConfig(_) => "CHECKPOINT_CONFIG_ERROR",
            Self::Io(_) => "CHECKPOINT_STORE_ERROR",
        }
    }

    /// Path traversal, symlink or id format violation.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Path { .. })
    }

    /// Size or compression-ratio violation.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::Size(_))
    }

    /// Errors that `list` may skip for a single entry. Security and size
    /// violations are never in this set.
    pub(crate) fn is_skippable_entry(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. } | Self::Compression(_) | Self::Serialization(_)
        )
    }

    pub(crate) fn path(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Path {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corruption(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn integrity(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_error_display() {
        let err = CheckpointError::path("../etc/passwd", "invalid checkpoint id format");
        let msg = err.to_string();
        assert!(msg.contains("../etc/passwd"));
        assert!(msg.contains("invalid checkpoint id format"));
        assert!(err.is_security());
        assert_eq!(err.code(), "CHECKPOINT_PATH_ERROR");
    }

    #[test]
    fn test_size_error_classification() {
        let err = CheckpointError::Size("ratio 500.0 exceeds 100".to_string());
        assert!(err.is_resource_limit());
        assert!(!err.is_security());
        assert!(!err.is_skippable_entry());
        assert_eq!(err.code(), "CHECKPOINT_SIZE_ERROR");
    }

    #[test]
    fn test_corruption_is_skippable() {
        let err = CheckpointError::corruption("abc", "expected value at line 1");
        assert!(err.is_skippable_entry());
        assert!(err.to_string().contains("corrupted"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CheckpointError = io_err.into();
        assert!(err.to_string().contains("denied"));
        assert_eq!(err.code(), "CHECKPOINT_STORE_ERROR");
    }

    #[test]
    fn test_integrity_error_display() {
        let err = CheckpointError::integrity("abc", "state history out of order");
        assert!(err.to_string().contains("integrity"));
        assert_eq!(err.code(), "CHECKPOINT_INTEGRITY_ERROR");
    }
}
