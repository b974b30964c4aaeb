//! Data types for dependency resolution.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use desam_protocol::DataDependencySummary;
use desam_transfer::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::error::FileDepsError;
use crate::tree::FileTreeNode;

/// How a dependency's content relates to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyCategory {
    /// Unknown to the store: upload, consumes quota.
    New,
    /// Stored but not linked to this principal: register, consumes quota.
    ExistingUnreferenced,
    /// Stored and already linked: nothing to do.
    ExistingReferenced,
}

impl DependencyCategory {
    /// Maps an existence query answer onto a category.
    pub fn from_existence(exists: bool, referenced_by_principal: bool) -> Self {
        match (exists, referenced_by_principal) {
            (false, _) => Self::New,
            (true, false) => Self::ExistingUnreferenced,
            (true, true) => Self::ExistingReferenced,
        }
    }

    /// Returns `true` for the categories billed against quota.
    pub fn consumes_quota(self) -> bool {
        !matches!(self, Self::ExistingReferenced)
    }
}

/// One local source resolved for a mount path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDependency {
    pub local_path: PathBuf,
    pub mount_path: String,
    pub digest: ContentDigest,
    pub size: u64,
    pub category: DependencyCategory,
}

/// Dependencies of one resolution, grouped by category.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    pub new: Vec<DataDependency>,
    pub unreferenced: Vec<DataDependency>,
    pub referenced: Vec<DataDependency>,
    file_hashes: BTreeSet<ContentDigest>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dependency under its category.
    pub fn add(&mut self, dependency: DataDependency) {
        self.file_hashes.insert(dependency.digest.clone());
        match dependency.category {
            DependencyCategory::New => self.new.push(dependency),
            DependencyCategory::ExistingUnreferenced => self.unreferenced.push(dependency),
            DependencyCategory::ExistingReferenced => self.referenced.push(dependency),
        }
    }

    /// Bytes billed to the principal: NEW and EXISTING_UNREFERENCED content,
    /// each distinct digest counted once.
    pub fn total_a_b_size(&self) -> u64 {
        let mut billed = HashSet::new();
        self.new
            .iter()
            .chain(&self.unreferenced)
            .filter(|d| billed.insert(&d.digest))
            .map(|d| d.size)
            .sum()
    }

    /// Distinct digests across all categories, sorted.
    pub fn file_hashes(&self) -> &BTreeSet<ContentDigest> {
        &self.file_hashes
    }

    /// All dependencies, NEW first.
    pub fn iter(&self) -> impl Iterator<Item = &DataDependency> {
        self.new
            .iter()
            .chain(&self.unreferenced)
            .chain(&self.referenced)
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.unreferenced.len() + self.referenced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata of content known to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub digest: ContentDigest,
    pub size: u64,
    pub name: String,
    /// When the upload or reference was confirmed.
    pub upload_time: DateTime<Utc>,
}

/// Storage budget of the principal, as last reported by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

/// A local source and the path it is mounted at inside the job.
///
/// A mount path ending in `/` is a directory mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub local_path: PathBuf,
    pub mount_path: String,
}

impl FileMapping {
    pub fn new(local_path: impl AsRef<Path>, mount_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.as_ref().to_path_buf(),
            mount_path: mount_path.into(),
        }
    }
}

/// A mapping that could not be resolved in partial mode.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub local_path: PathBuf,
    pub mount_path: String,
    /// Known once the content has been hashed.
    pub digest: Option<ContentDigest>,
    pub error: Arc<FileDepsError>,
}

/// Outcome of one resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub dependencies: DependencySet,
    /// Mount tree of every successfully resolved dependency.
    pub tree: FileTreeNode,
    pub failures: Vec<ItemFailure>,
}

impl Resolution {
    /// Returns `true` if every mapping resolved.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Descriptor handed to the job submission service.
    pub fn summary(&self) -> DataDependencySummary {
        DataDependencySummary {
            file_tree: self.tree.to_wire(),
            total_a_b_size: self.dependencies.total_a_b_size(),
            new_count: self.dependencies.new.len(),
            unreferenced_count: self.dependencies.unreferenced.len(),
            referenced_count: self.dependencies.referenced.len(),
            file_hashes: self
                .dependencies
                .file_hashes()
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(data: &[u8], mount: &str, size: u64, category: DependencyCategory) -> DataDependency {
        DataDependency {
            local_path: PathBuf::from(format!("/src/{mount}")),
            mount_path: mount.into(),
            digest: ContentDigest::of_bytes(data),
            size,
            category,
        }
    }

    #[test]
    fn category_decision_table() {
        assert_eq!(
            DependencyCategory::from_existence(false, false),
            DependencyCategory::New
        );
        assert_eq!(
            DependencyCategory::from_existence(false, true),
            DependencyCategory::New
        );
        assert_eq!(
            DependencyCategory::from_existence(true, false),
            DependencyCategory::ExistingUnreferenced
        );
        assert_eq!(
            DependencyCategory::from_existence(true, true),
            DependencyCategory::ExistingReferenced
        );
    }

    #[test]
    fn category_quota_billing() {
        assert!(DependencyCategory::New.consumes_quota());
        assert!(DependencyCategory::ExistingUnreferenced.consumes_quota());
        assert!(!DependencyCategory::ExistingReferenced.consumes_quota());
    }

    #[test]
    fn category_serde_names() {
        let json = serde_json::to_string(&DependencyCategory::ExistingUnreferenced).unwrap();
        assert_eq!(json, "\"EXISTING_UNREFERENCED\"");
    }

    #[test]
    fn total_size_counts_only_new_and_unreferenced() {
        let mut set = DependencySet::new();
        set.add(dep(b"a", "a", 100, DependencyCategory::New));
        set.add(dep(b"b", "b", 200, DependencyCategory::ExistingUnreferenced));
        set.add(dep(b"c", "c", 300, DependencyCategory::ExistingReferenced));

        assert_eq!(set.total_a_b_size(), 300);
        assert_eq!(set.len(), 3);
        assert_eq!(set.file_hashes().len(), 3);
    }

    #[test]
    fn referenced_never_changes_total() {
        let mut set = DependencySet::new();
        set.add(dep(b"a", "a", 100, DependencyCategory::New));
        let before = set.total_a_b_size();
        set.add(dep(b"c", "c", 5000, DependencyCategory::ExistingReferenced));
        assert_eq!(set.total_a_b_size(), before);
    }

    #[test]
    fn same_digest_at_two_mounts_billed_once() {
        let mut set = DependencySet::new();
        set.add(dep(b"shared", "A/one.bin", 100, DependencyCategory::New));
        set.add(dep(b"shared", "B/two.bin", 100, DependencyCategory::New));

        assert_eq!(set.new.len(), 2);
        assert_eq!(set.total_a_b_size(), 100);
        assert_eq!(set.file_hashes().len(), 1);
    }

    #[test]
    fn file_info_json_uses_camel_case() {
        let info = FileInfo {
            digest: ContentDigest::of_bytes(b"x"),
            size: 1,
            name: "x.txt".into(),
            upload_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"uploadTime\""));
        let parsed: FileInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}
