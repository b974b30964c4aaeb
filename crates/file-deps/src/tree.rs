//! Mount tree construction.
//!
//! Mount paths are split into segments and merged into one hierarchy:
//! every segment but the last becomes a directory, the last becomes a leaf
//! carrying the content digest. Children are kept in a sorted map, so the
//! resulting tree does not depend on insertion order.

use std::collections::BTreeMap;

use desam_protocol::FileTreeNode as WireNode;
use desam_transfer::{ContentDigest, mount_segments};

use crate::error::FileDepsError;

/// A node of the mount tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTreeNode {
    File { digest: ContentDigest },
    Directory { children: BTreeMap<String, FileTreeNode> },
}

impl Default for FileTreeNode {
    fn default() -> Self {
        Self::empty_dir()
    }
}

impl FileTreeNode {
    pub fn empty_dir() -> Self {
        Self::Directory {
            children: BTreeMap::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    /// Digest of a leaf; `None` for directories.
    pub fn digest(&self) -> Option<&ContentDigest> {
        match self {
            Self::File { digest } => Some(digest),
            Self::Directory { .. } => None,
        }
    }

    /// Children of a directory; `None` for leaves.
    pub fn children(&self) -> Option<&BTreeMap<String, FileTreeNode>> {
        match self {
            Self::File { .. } => None,
            Self::Directory { children } => Some(children),
        }
    }

    /// Looks up the node at a `/`-separated path below this node.
    pub fn get(&self, path: &str) -> Option<&FileTreeNode> {
        mount_segments(path)
            .into_iter()
            .try_fold(self, |node, segment| node.children()?.get(segment))
    }

    /// Number of leaves below this node.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::File { .. } => 1,
            Self::Directory { children } => children.values().map(Self::leaf_count).sum(),
        }
    }

    /// Converts to the wire manifest. The root is labelled with an empty path.
    pub fn to_wire(&self) -> WireNode {
        self.to_wire_named("")
    }

    fn to_wire_named(&self, name: &str) -> WireNode {
        match self {
            Self::File { digest } => WireNode {
                path: name.to_string(),
                file_hash: Some(digest.to_string()),
                is_file: true,
                children: Vec::new(),
            },
            Self::Directory { children } => WireNode {
                path: name.to_string(),
                file_hash: None,
                is_file: false,
                children: children
                    .iter()
                    .map(|(child, node)| node.to_wire_named(child))
                    .collect(),
            },
        }
    }
}

/// Merges `(mount path, digest)` pairs into one [`FileTreeNode`].
#[derive(Debug, Default)]
pub struct FileTreeBuilder {
    root: BTreeMap<String, FileTreeNode>,
    /// Normalized leaf path -> mount path as given, for conflict reports.
    origins: BTreeMap<String, String>,
}

impl FileTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a leaf for `digest` at `mount_path`.
    ///
    /// The same digest inserted twice at one path is merged. A leaf where a
    /// directory is needed (or the reverse), or two different digests at one
    /// path, fail with [`FileDepsError::TreeConflict`] and leave the builder
    /// unchanged.
    pub fn insert(&mut self, mount_path: &str, digest: &ContentDigest) -> Result<(), FileDepsError> {
        let segments = mount_segments(mount_path);
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(FileDepsError::InvalidMapping(format!(
                "mount path names nothing: {mount_path:?}"
            )));
        };

        if self.check(&segments, digest)? {
            return Ok(());
        }

        let mut children = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let node = children
                .entry((*segment).to_string())
                .or_insert_with(FileTreeNode::empty_dir);
            match node {
                FileTreeNode::Directory { children: next } => children = next,
                FileTreeNode::File { .. } => {
                    return Err(conflict_at(&self.origins, &segments[..=depth]));
                }
            }
        }
        children.insert(
            (*leaf).to_string(),
            FileTreeNode::File {
                digest: digest.clone(),
            },
        );
        self.origins.insert(segments.join("/"), mount_path.to_string());
        Ok(())
    }

    /// Read-only conflict check. Returns `true` if the identical leaf exists.
    fn check(&self, segments: &[&str], digest: &ContentDigest) -> Result<bool, FileDepsError> {
        let Some((leaf, parents)) = segments.split_last() else {
            return Ok(false);
        };
        let full = segments.join("/");

        let mut children = &self.root;
        for (depth, segment) in parents.iter().enumerate() {
            match children.get(*segment) {
                None => return Ok(false),
                Some(FileTreeNode::Directory { children: next }) => children = next,
                Some(FileTreeNode::File { .. }) => {
                    return Err(conflict_at(&self.origins, &segments[..=depth]));
                }
            }
        }

        match children.get(*leaf) {
            None => Ok(false),
            Some(FileTreeNode::File { digest: existing }) if existing == digest => Ok(true),
            Some(FileTreeNode::File { .. }) => Err(conflict_at(&self.origins, segments)),
            Some(FileTreeNode::Directory { .. }) => {
                let prefix = format!("{full}/");
                let below = self
                    .origins
                    .range(prefix.clone()..)
                    .find(|(path, _)| path.starts_with(&prefix))
                    .map(|(_, origin)| origin.clone())
                    .unwrap_or(prefix);
                Err(FileDepsError::TreeConflict {
                    path: full,
                    conflicting_with: below,
                })
            }
        }
    }

    /// Returns the root directory node.
    pub fn build(self) -> FileTreeNode {
        FileTreeNode::Directory {
            children: self.root,
        }
    }
}

/// Conflict with the existing leaf at `segments`.
fn conflict_at(origins: &BTreeMap<String, String>, segments: &[&str]) -> FileDepsError {
    let path = segments.join("/");
    let existing = origins.get(&path).cloned().unwrap_or_else(|| path.clone());
    FileDepsError::TreeConflict {
        path,
        conflicting_with: existing,
    }
}
