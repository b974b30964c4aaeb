//! In-memory [`RemoteAuthority`] for tests and offline use.
//!
//! Holds content, references and per-principal quota in process memory,
//! counts every call, and can inject the failures a real authority
//! produces: rejected credentials, transient transport errors, corrupted
//! uploads, slow or stalled calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use desam_protocol::{
    QueryExistenceRequest, QueryExistenceResponse, QueryQuotaRequest, QueryQuotaResponse,
    RegisterReferenceRequest, RegisterReferenceResponse, ResponseStatus, UploadContentRequest,
    UploadContentResponse,
};
use desam_transfer::{ContentDigest, checksum_bytes};
use tokio::sync::Mutex;
use tracing::debug;

use crate::authority::{AuthorityFuture, ChunkStream, RemoteAuthority};
use crate::error::FileDepsError;

#[derive(Default)]
struct StoreState {
    /// Content by hex digest.
    objects: HashMap<String, Vec<u8>>,
    /// Referenced digests by principal.
    references: HashMap<String, HashSet<String>>,
}

impl StoreState {
    fn used(&self, principal: &str) -> u64 {
        self.references
            .get(principal)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| self.objects.get(h))
                    .map(|data| data.len() as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    fn is_referenced(&self, principal: &str, hash: &str) -> bool {
        self.references
            .get(principal)
            .is_some_and(|hashes| hashes.contains(hash))
    }

    fn reference(&mut self, principal: &str, hash: &str) {
        self.references
            .entry(principal.to_string())
            .or_default()
            .insert(hash.to_string());
    }
}

/// In-memory content store with call counters and fault injection.
pub struct InMemoryAuthority {
    total_quota: u64,
    state: Mutex<StoreState>,

    quota_queries: AtomicUsize,
    existence_queries: AtomicUsize,
    registrations: AtomicUsize,
    uploads: AtomicUsize,

    reject_credentials: AtomicBool,
    quota_unavailable: AtomicBool,
    corrupt_uploads: AtomicBool,
    stall_uploads: AtomicBool,
    reject_registrations: AtomicBool,
    transient_failures: AtomicU32,
    call_delay_ms: AtomicU64,
}

impl InMemoryAuthority {
    /// Creates an empty store granting every principal `total_quota` bytes.
    pub fn new(total_quota: u64) -> Self {
        Self {
            total_quota,
            state: Mutex::new(StoreState::default()),
            quota_queries: AtomicUsize::new(0),
            existence_queries: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            reject_credentials: AtomicBool::new(false),
            quota_unavailable: AtomicBool::new(false),
            corrupt_uploads: AtomicBool::new(false),
            stall_uploads: AtomicBool::new(false),
            reject_registrations: AtomicBool::new(false),
            transient_failures: AtomicU32::new(0),
            call_delay_ms: AtomicU64::new(0),
        }
    }

    /// Stores `data` directly, optionally referenced by `principal`.
    pub async fn seed_content(&self, data: &[u8], principal: Option<&str>) -> ContentDigest {
        let digest = ContentDigest::of_bytes(data);
        let mut state = self.state.lock().await;
        state.objects.insert(digest.to_string(), data.to_vec());
        if let Some(principal) = principal {
            state.reference(principal, digest.as_str());
        }
        digest
    }

    /// Stored bytes of `digest`.
    pub async fn content(&self, digest: &ContentDigest) -> Option<Vec<u8>> {
        self.state.lock().await.objects.get(digest.as_str()).cloned()
    }

    pub async fn is_referenced(&self, digest: &ContentDigest, principal: &str) -> bool {
        self.state
            .lock()
            .await
            .is_referenced(principal, digest.as_str())
    }

    /// Bytes currently billed to `principal`.
    pub async fn used_quota(&self, principal: &str) -> u64 {
        self.state.lock().await.used(principal)
    }

    pub fn quota_queries(&self) -> usize {
        self.quota_queries.load(Ordering::SeqCst)
    }

    pub fn existence_queries(&self) -> usize {
        self.existence_queries.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Total remote calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.quota_queries() + self.existence_queries() + self.registrations() + self.uploads()
    }

    /// Fails every call with [`FileDepsError::AuthenticationFailure`].
    pub fn reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Answers quota queries with `success = false`.
    pub fn set_quota_unavailable(&self, unavailable: bool) {
        self.quota_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Confirms uploads with a digest that differs from the received bytes.
    pub fn corrupt_uploads(&self, corrupt: bool) {
        self.corrupt_uploads.store(corrupt, Ordering::SeqCst);
    }

    /// Makes uploads hang without reading their content stream.
    pub fn stall_uploads(&self, stall: bool) {
        self.stall_uploads.store(stall, Ordering::SeqCst);
    }

    /// Answers reference registrations with `success = false`.
    pub fn reject_registrations(&self, reject: bool) {
        self.reject_registrations.store(reject, Ordering::SeqCst);
    }

    /// Fails the next `count` calls with a transient transport error.
    pub fn fail_next_calls(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Delays every call by `delay`.
    pub fn set_call_delay(&self, delay: Duration) {
        self.call_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Applies the configured delay and faults to one incoming call.
    async fn admit(&self) -> Result<(), FileDepsError> {
        let delay = self.call_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(FileDepsError::AuthenticationFailure("invalid api key".into()));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FileDepsError::Transfer("connection reset by peer".into()));
        }
        Ok(())
    }

    fn available(&self, state: &StoreState, principal: &str) -> u64 {
        self.total_quota.saturating_sub(state.used(principal))
    }
}

impl RemoteAuthority for InMemoryAuthority {
    fn query_quota(&self, request: QueryQuotaRequest) -> AuthorityFuture<'_, QueryQuotaResponse> {
        self.quota_queries.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            self.admit().await?;
            if self.quota_unavailable.load(Ordering::SeqCst) {
                return Ok(QueryQuotaResponse {
                    response: ResponseStatus::failed("quota service unavailable"),
                    total_quota: 0,
                    used_quota: 0,
                    available_quota: 0,
                });
            }
            let state = self.state.lock().await;
            let used = state.used(&request.principal);
            Ok(QueryQuotaResponse {
                response: ResponseStatus::ok(),
                total_quota: self.total_quota,
                used_quota: used,
                available_quota: self.total_quota.saturating_sub(used),
            })
        })
    }

    fn query_existence(
        &self,
        request: QueryExistenceRequest,
    ) -> AuthorityFuture<'_, QueryExistenceResponse> {
        self.existence_queries.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            self.admit().await?;
            let state = self.state.lock().await;
            Ok(QueryExistenceResponse {
                response: ResponseStatus::ok(),
                exists: state.objects.contains_key(&request.file_hash),
                referenced_by_principal: state
                    .is_referenced(&request.principal, &request.file_hash),
            })
        })
    }

    fn register_reference(
        &self,
        request: RegisterReferenceRequest,
    ) -> AuthorityFuture<'_, RegisterReferenceResponse> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            self.admit().await?;
            if self.reject_registrations.load(Ordering::SeqCst) {
                return Ok(RegisterReferenceResponse {
                    response: ResponseStatus::failed("reference registration disabled"),
                });
            }
            let mut state = self.state.lock().await;
            let Some(size) = state.objects.get(&request.file_hash).map(|d| d.len() as u64) else {
                return Ok(RegisterReferenceResponse {
                    response: ResponseStatus::failed("content not found"),
                });
            };
            if !state.is_referenced(&request.principal, &request.file_hash) {
                if size > self.available(&state, &request.principal) {
                    return Ok(RegisterReferenceResponse {
                        response: ResponseStatus::failed("quota exceeded"),
                    });
                }
                state.reference(&request.principal, &request.file_hash);
            }
            Ok(RegisterReferenceResponse {
                response: ResponseStatus::ok(),
            })
        })
    }

    fn upload_content(
        &self,
        request: UploadContentRequest,
        mut chunks: ChunkStream,
    ) -> AuthorityFuture<'_, UploadContentResponse> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            self.admit().await?;
            if self.stall_uploads.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }

            let failed = |message: &str| UploadContentResponse {
                response: ResponseStatus::failed(message),
                file_hash: String::new(),
            };

            let mut received = Vec::new();
            while let Some(chunk) = chunks.recv().await {
                if chunk.offset != received.len() as u64 {
                    return Ok(failed("chunk out of order"));
                }
                if checksum_bytes(&chunk.data) != chunk.checksum {
                    return Ok(failed("chunk checksum mismatch"));
                }
                received.extend_from_slice(&chunk.data);
            }
            if received.len() as u64 != request.file_size {
                return Ok(failed("size mismatch"));
            }

            if self.corrupt_uploads.load(Ordering::SeqCst) {
                received.push(0);
            }
            let digest = ContentDigest::of_bytes(&received);
            let size = received.len() as u64;

            let mut state = self.state.lock().await;
            if size > self.available(&state, &request.principal) {
                return Ok(failed("quota exceeded"));
            }
            state.objects.insert(digest.to_string(), received);
            state.reference(&request.principal, digest.as_str());
            debug!(
                name = %request.file_name,
                digest = %digest.short(),
                bytes = size,
                "stored upload"
            );

            Ok(UploadContentResponse {
                response: ResponseStatus::ok(),
                file_hash: digest.to_string(),
            })
        })
    }
}
