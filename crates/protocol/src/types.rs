use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One node of the mount manifest consumed by the job materializer.
///
/// Leaves carry a content hash and no children; directories carry children
/// sorted by name and no hash. The root has an empty `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTreeNode {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
}

impl FileTreeNode {
    /// Returns the direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&FileTreeNode> {
        self.children.iter().find(|c| c.path == name)
    }
}

/// Opaque data-dependency descriptor attached to a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDependencySummary {
    pub file_tree: FileTreeNode,
    /// Bytes billed to the principal (new and newly referenced content).
    #[serde(rename = "totalABSize")]
    pub total_a_b_size: u64,
    pub new_count: usize,
    pub unreferenced_count: usize,
    pub referenced_count: usize,
    /// Distinct content hashes, sorted.
    pub file_hashes: Vec<String>,
}

/// Resources and command of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub name: String,
    pub command: String,
    pub cpu: u32,
    pub memory_mb: u64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub gpu: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Payload handed to the job submission service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub job: JobSpec,
    pub data_dependencies: DataDependencySummary,
}
