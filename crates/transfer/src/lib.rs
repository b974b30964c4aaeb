//! Local data plane for DeSAM uploads.
//!
//! - [`checksum`]: content digests and chunked streaming reads
//! - [`archive`]: deterministic directory packaging
//! - [`progress`]: non-blocking progress delivery
//! - [`validation`]: mount path checks

pub mod archive;
pub mod checksum;
pub mod progress;
mod types;
mod validation;

use std::path::PathBuf;

pub use archive::{ARCHIVE_EXTENSION, is_packaged_archive, package_directory};
pub use checksum::{ChunkReader, ContentDigest, checksum_bytes, digest_file, file_size};
pub use progress::{ProgressCallback, ProgressReporter, ProgressSink};
pub use types::{Chunk, UploadProgress};
pub use validation::{is_directory_mount, mount_segments, validate_mount_path};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// Maps an open/metadata error on `path` to `NotFound` when applicable.
pub(crate) fn open_error(path: &std::path::Path, err: std::io::Error) -> TransferError {
    if err.kind() == std::io::ErrorKind::NotFound {
        TransferError::NotFound(path.to_path_buf())
    } else {
        TransferError::Io(err)
    }
}
