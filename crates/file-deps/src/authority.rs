//! Remote file authority abstraction.
//!
//! `RemoteAuthority` is implemented by the embedding application on top of
//! its RPC client. Keeping the four operations behind a trait keeps the
//! resolver free of transport details and testable with
//! [`InMemoryAuthority`](crate::InMemoryAuthority).

use std::future::Future;
use std::pin::Pin;

use desam_protocol::{
    QueryExistenceRequest, QueryExistenceResponse, QueryQuotaRequest, QueryQuotaResponse,
    RegisterReferenceRequest, RegisterReferenceResponse, UploadContentRequest,
    UploadContentResponse,
};
use desam_transfer::Chunk;
use tokio::sync::mpsc;

use crate::error::FileDepsError;

/// Boxed future returned by authority calls.
pub type AuthorityFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FileDepsError>> + Send + 'a>>;

/// Content stream of one upload, in offset order. Closed after the last chunk.
pub type ChunkStream = mpsc::Receiver<Chunk>;

/// The remote service owning stored content, references and quota.
///
/// Implementations report rejected credentials as
/// [`FileDepsError::AuthenticationFailure`] and transport failures as
/// [`FileDepsError::Transfer`]. A reachable service refusing an operation
/// answers with `success = false` in the response status.
pub trait RemoteAuthority: Send + Sync {
    /// Returns the storage budget of the requesting principal.
    fn query_quota(&self, request: QueryQuotaRequest) -> AuthorityFuture<'_, QueryQuotaResponse>;

    /// Reports whether content exists and whether the principal references it.
    fn query_existence(
        &self,
        request: QueryExistenceRequest,
    ) -> AuthorityFuture<'_, QueryExistenceResponse>;

    /// Links existing content to the principal without transferring bytes.
    fn register_reference(
        &self,
        request: RegisterReferenceRequest,
    ) -> AuthorityFuture<'_, RegisterReferenceResponse>;

    /// Stores the content read from `chunks` and returns the digest the
    /// store computed over the received bytes.
    fn upload_content(
        &self,
        request: UploadContentRequest,
        chunks: ChunkStream,
    ) -> AuthorityFuture<'_, UploadContentResponse>;
}
