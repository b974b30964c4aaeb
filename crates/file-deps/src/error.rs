//! Dependency resolution error types.

use std::path::PathBuf;
use std::sync::Arc;

use desam_transfer::{ContentDigest, TransferError};

/// Errors produced while resolving, uploading or submitting job data.
#[derive(Debug, thiserror::Error)]
pub enum FileDepsError {
    /// Local source path does not exist. Raised before any remote call.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Transport failure or timeout on a remote call.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// The remote store answered but reported failure.
    #[error("file transfer failed: {0}")]
    FileTransfer(String),

    #[error("integrity error: local digest {digest}, store confirmed {confirmed:?}")]
    Integrity {
        digest: ContentDigest,
        confirmed: String,
    },

    #[error("quota exceeded: {required} bytes required, {available} available")]
    QuotaExceeded { required: u64, available: u64 },

    #[error("tree conflict at {path:?} (conflicts with {conflicting_with:?})")]
    TreeConflict {
        path: String,
        conflicting_with: String,
    },

    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("cancelled")]
    Cancelled,

    /// A per-item failure that aborted an all-or-nothing resolution.
    #[error("{mount_path}: {source}")]
    Item {
        mount_path: String,
        source: Arc<FileDepsError>,
    },
}

impl FileDepsError {
    /// Returns `true` if the failed call may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transfer(_) => true,
            Self::Item { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if the error aborts a whole resolution regardless of mode.
    pub fn is_batch_fatal(&self) -> bool {
        match self {
            Self::AuthenticationFailure(_)
            | Self::QuotaExceeded { .. }
            | Self::TreeConflict { .. }
            | Self::Cancelled => true,
            Self::Item { source, .. } => source.is_batch_fatal(),
            _ => false,
        }
    }

    /// Turns a shared per-item failure into the error that aborts a batch.
    ///
    /// Batch-fatal kinds surface unwrapped; everything else is tagged with
    /// the mount path it failed for.
    pub(crate) fn abort_batch(mount_path: &str, err: Arc<FileDepsError>) -> Self {
        match &*err {
            Self::AuthenticationFailure(message) => Self::AuthenticationFailure(message.clone()),
            Self::Cancelled => Self::Cancelled,
            _ => Self::Item {
                mount_path: mount_path.to_string(),
                source: err,
            },
        }
    }
}

impl From<TransferError> for FileDepsError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::NotFound(path) => Self::NotFound(path),
            TransferError::Io(e) => Self::Io(e),
            TransferError::InvalidPath(message) => Self::InvalidMapping(message),
            TransferError::InvalidDigest(message) => {
                Self::FileTransfer(format!("invalid digest: {message}"))
            }
            TransferError::Archive(e) => Self::Io(std::io::Error::other(e)),
        }
    }
}

impl From<tokio::task::JoinError> for FileDepsError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::from(err))
    }
}
