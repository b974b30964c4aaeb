use std::path::{Component, Path};

use crate::TransferError;

/// Validates a mount path: a POSIX-style path relative to the job's
/// working directory.
///
/// Rejects:
/// - Empty paths, or paths with no named segment (`./`)
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_mount_path(mount_path: &str) -> Result<(), TransferError> {
    if mount_path.is_empty() {
        return Err(TransferError::InvalidPath("empty mount path".into()));
    }

    if mount_path.starts_with('/') || Path::new(mount_path).is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute mount path not allowed: {mount_path}"
        )));
    }

    for component in Path::new(mount_path).components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {mount_path}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute mount path not allowed: {mount_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    if mount_segments(mount_path).is_empty() {
        return Err(TransferError::InvalidPath(format!(
            "mount path names nothing: {mount_path}"
        )));
    }

    Ok(())
}

/// Returns `true` if the mount path denotes a directory (trailing `/`).
pub fn is_directory_mount(mount_path: &str) -> bool {
    mount_path.ends_with('/')
}

/// Splits a mount path into its named segments, dropping empty and `.` parts.
pub fn mount_segments(mount_path: &str) -> Vec<&str> {
    mount_path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}
