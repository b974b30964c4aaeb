//! Wire types shared between the DeSAM client and the remote file authority.
//!
//! The authority exposes four operations (quota, existence, reference
//! registration, content upload); [`messages`] holds their request and
//! response payloads. [`types`] holds the mount manifest and job submission
//! payload handed to the scheduler.

pub mod messages;
pub mod types;

pub use messages::{
    QueryExistenceRequest, QueryExistenceResponse, QueryQuotaRequest, QueryQuotaResponse,
    RegisterReferenceRequest, RegisterReferenceResponse, ResponseStatus, UploadContentRequest,
    UploadContentResponse,
};
pub use types::{DataDependencySummary, FileTreeNode, JobSpec, JobSubmission};
