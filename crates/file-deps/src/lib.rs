//! Job data dependencies for DeSAM: classify, upload, quota, mount tree.
//!
//! This crate implements the **client side** of attaching local data to a
//! job. It has no transport of its own; the embedding application provides
//! a [`RemoteAuthority`] on top of its RPC client.
//!
//! # Pipeline
//!
//! 1. **Validate** mappings and local sources
//! 2. **Prepare** package directories and hash content
//! 3. **Classify** each digest as new, existing-unreferenced or referenced
//! 4. **Quota** check the bytes the principal would be billed
//! 5. **Transfer** upload or register content, deduplicated by digest
//! 6. **Tree** assemble the mount manifest for the job

pub mod authority;
pub mod classifier;
pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod memory;
pub mod quota;
pub mod retry;
pub mod tree;
pub mod types;

// Re-export primary types for convenience.
pub use authority::{AuthorityFuture, ChunkStream, RemoteAuthority};
pub use classifier::{Classification, DependencyClassifier};
pub use config::{ClientConfig, ResolveConfig, ResolveMode, RetrySettings, config_path};
pub use error::FileDepsError;
pub use job::JobSubmitter;
pub use manager::FileManager;
pub use memory::InMemoryAuthority;
pub use quota::QuotaTracker;
pub use retry::RetryPolicy;
pub use tree::{FileTreeBuilder, FileTreeNode};
pub use types::{
    DataDependency, DependencyCategory, DependencySet, FileInfo, FileMapping, ItemFailure,
    QuotaInfo, Resolution,
};
