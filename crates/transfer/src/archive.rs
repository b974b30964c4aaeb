//! Deterministic directory packaging.
//!
//! A directory is packaged into a single ZIP file so it can be addressed by
//! one content digest. Entries are written in lexicographic order of their
//! relative path with fixed timestamps and permissions, so byte-identical
//! trees always produce byte-identical archives.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::{TransferError, open_error};

/// File extension of packaged directories.
pub const ARCHIVE_EXTENSION: &str = "zip";

const LOCAL_HEADER_MAGIC: [u8; 4] = *b"PK\x03\x04";
const EMPTY_ARCHIVE_MAGIC: [u8; 4] = *b"PK\x05\x06";

/// One entry collected from the directory walk.
struct TreeEntry {
    /// Relative path with `/` separators.
    relative_path: String,
    path: PathBuf,
    is_dir: bool,
    size: u64,
}

/// Packages `dir` into a new archive inside `staging_dir` and returns its path.
///
/// The archive is named after the directory; an index suffix is added if a
/// file with that name already exists in `staging_dir`.
pub fn package_directory(dir: &Path, staging_dir: &Path) -> Result<PathBuf, TransferError> {
    let stem = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "package".into());

    let mut archive_path = staging_dir.join(format!("{stem}.{ARCHIVE_EXTENSION}"));
    let mut index = 1;
    while archive_path.exists() {
        archive_path = staging_dir.join(format!("{stem}-{index}.{ARCHIVE_EXTENSION}"));
        index += 1;
    }

    package_directory_to(dir, &archive_path)?;
    Ok(archive_path)
}

/// Packages `dir` into the archive file at `archive_path`.
pub fn package_directory_to(dir: &Path, archive_path: &Path) -> Result<(), TransferError> {
    let metadata = std::fs::metadata(dir).map_err(|e| open_error(dir, e))?;
    if !metadata.is_dir() {
        return Err(TransferError::InvalidPath(format!(
            "not a directory: {}",
            dir.display()
        )));
    }

    let mut entries = Vec::new();
    walk_dir(dir, dir, &mut entries)?;
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let base = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    for entry in &entries {
        if entry.is_dir {
            zip.add_directory(entry.relative_path.as_str(), base.unix_permissions(0o755))?;
            continue;
        }
        let options = base
            .unix_permissions(0o644)
            .large_file(entry.size >= u64::from(u32::MAX));
        zip.start_file(entry.relative_path.as_str(), options)?;
        let mut source = File::open(&entry.path).map_err(|e| open_error(&entry.path, e))?;
        io::copy(&mut source, &mut zip)?;
    }
    zip.finish()?;

    debug!(
        dir = %dir.display(),
        archive = %archive_path.display(),
        entries = entries.len(),
        "packaged directory"
    );
    Ok(())
}

fn walk_dir(root: &Path, current: &Path, entries: &mut Vec<TreeEntry>) -> Result<(), TransferError> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let mut metadata = std::fs::symlink_metadata(&path)?;
        if metadata.file_type().is_symlink() {
            // Linked files are packaged by content; linked directories are
            // skipped since they may point back up the tree.
            metadata = std::fs::metadata(&path)?;
            if metadata.is_dir() {
                warn!(link = %path.display(), "skipping directory symlink");
                continue;
            }
        }

        let rel_path = path.strip_prefix(root).map_err(io::Error::other)?;
        let rel_str = rel_path.to_string_lossy().replace('\\', "/");

        if metadata.is_dir() {
            entries.push(TreeEntry {
                relative_path: format!("{rel_str}/"),
                path: path.clone(),
                is_dir: true,
                size: 0,
            });
            walk_dir(root, &path, entries)?;
        } else if metadata.is_file() {
            entries.push(TreeEntry {
                relative_path: rel_str,
                path,
                is_dir: false,
                size: metadata.len(),
            });
        }
    }
    Ok(())
}

/// Returns `true` if `path` is already a packaged archive.
///
/// Checks the leading ZIP signature first and then that the central
/// directory can be read.
pub fn is_packaged_archive(path: &Path) -> Result<bool, TransferError> {
    let mut file = File::open(path).map_err(|e| open_error(path, e))?;
    if !file.metadata()?.is_file() {
        return Ok(false);
    }

    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file.read(&mut magic[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    if magic != LOCAL_HEADER_MAGIC && magic != EMPTY_ARCHIVE_MAGIC {
        return Ok(false);
    }

    let file = File::open(path)?;
    Ok(zip::ZipArchive::new(file).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest_file;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree(root: &Path) {
        fs::create_dir_all(root.join("data").join("levels")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("file1.txt"), b"content1").unwrap();
        fs::write(root.join("file2.txt"), b"content2").unwrap();
        fs::write(root.join("data").join("config.ini"), b"CFG").unwrap();
        fs::write(root.join("data").join("levels").join("l1.dat"), b"LEVEL").unwrap();
    }

    fn entry_names(archive: &Path) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn package_produces_archive() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let dir = src.path().join("models");
        fs::create_dir_all(&dir).unwrap();
        create_test_tree(&dir);

        let archive = package_directory(&dir, staging.path()).unwrap();
        assert!(archive.exists());
        assert_eq!(archive.file_name().unwrap(), "models.zip");
        assert!(is_packaged_archive(&archive).unwrap());
    }

    #[test]
    fn package_entries_sorted_and_complete() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        create_test_tree(src.path());

        let archive = package_directory(src.path(), staging.path()).unwrap();
        assert_eq!(
            entry_names(&archive),
            vec![
                "data/",
                "data/config.ini",
                "data/levels/",
                "data/levels/l1.dat",
                "empty/",
                "file1.txt",
                "file2.txt",
            ]
        );
    }

    #[test]
    fn package_twice_same_digest() {
        let src = TempDir::new().unwrap();
        let staging_a = TempDir::new().unwrap();
        let staging_b = TempDir::new().unwrap();
        create_test_tree(src.path());

        let a = package_directory(src.path(), staging_a.path()).unwrap();
        let b = package_directory(src.path(), staging_b.path()).unwrap();
        assert_eq!(digest_file(&a).unwrap(), digest_file(&b).unwrap());
    }

    #[test]
    fn identical_trees_in_different_places_match() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let left = one.path().join("left");
        let right = two.path().join("right");
        fs::create_dir_all(&left).unwrap();
        fs::create_dir_all(&right).unwrap();
        create_test_tree(&left);
        create_test_tree(&right);

        let a = package_directory(&left, staging.path()).unwrap();
        let b = package_directory(&right, staging.path()).unwrap();
        assert_eq!(digest_file(&a).unwrap(), digest_file(&b).unwrap());
    }

    #[test]
    fn changed_content_changes_digest() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        create_test_tree(src.path());
        let before = package_directory(src.path(), staging.path()).unwrap();

        fs::write(src.path().join("file1.txt"), b"content1 changed").unwrap();
        let after = package_directory(src.path(), staging.path()).unwrap();
        assert_ne!(before, after);
        assert_ne!(digest_file(&before).unwrap(), digest_file(&after).unwrap());
    }

    #[test]
    fn staging_name_collision_gets_suffix() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let dir = src.path().join("pkg");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a"), b"a").unwrap();

        let first = package_directory(&dir, staging.path()).unwrap();
        let second = package_directory(&dir, staging.path()).unwrap();
        assert_eq!(first.file_name().unwrap(), "pkg.zip");
        assert_eq!(second.file_name().unwrap(), "pkg-1.zip");
    }

    #[test]
    fn empty_directory_is_packaged() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let archive = package_directory(src.path(), staging.path()).unwrap();
        assert!(is_packaged_archive(&archive).unwrap());
        assert!(entry_names(&archive).is_empty());
    }

    #[test]
    fn package_rejects_file_and_missing() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let file = src.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            package_directory(&file, staging.path()),
            Err(TransferError::InvalidPath(_))
        ));
        assert!(matches!(
            package_directory(&src.path().join("missing"), staging.path()),
            Err(TransferError::NotFound(_))
        ));
    }

    #[test]
    fn plain_files_are_not_archives() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("t.txt");
        fs::write(&text, b"just some text").unwrap();
        let empty = dir.path().join("empty");
        fs::write(&empty, b"").unwrap();
        let fake = dir.path().join("fake.zip");
        fs::write(&fake, b"PK\x03\x04 but not really a zip").unwrap();

        assert!(!is_packaged_archive(&text).unwrap());
        assert!(!is_packaged_archive(&empty).unwrap());
        assert!(!is_packaged_archive(&fake).unwrap());
        assert!(matches!(
            is_packaged_archive(&dir.path().join("missing")),
            Err(TransferError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn directory_symlink_to_ancestor_is_skipped() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        create_test_tree(src.path());
        std::os::unix::fs::symlink(src.path(), src.path().join("data").join("loop")).unwrap();
        std::os::unix::fs::symlink(
            src.path().join("file1.txt"),
            src.path().join("linked.txt"),
        )
        .unwrap();

        let archive = package_directory(src.path(), staging.path()).unwrap();
        let names = entry_names(&archive);
        assert!(!names.iter().any(|n| n.starts_with("data/loop")));
        assert!(names.contains(&"linked.txt".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_fails_packaging() {
        let src = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        create_test_tree(src.path());
        std::os::unix::fs::symlink(src.path().join("gone"), src.path().join("broken")).unwrap();

        assert!(matches!(
            package_directory(src.path(), staging.path()),
            Err(TransferError::Io(_))
        ));
    }
}
