//! Three-way dependency classification with per-digest dedup.

use std::collections::HashMap;
use std::sync::Arc;

use desam_protocol::QueryExistenceRequest;
use desam_transfer::ContentDigest;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::authority::RemoteAuthority;
use crate::config::ResolveConfig;
use crate::error::FileDepsError;
use crate::retry::{retry, timed};
use crate::types::DependencyCategory;

/// Shared outcome of one digest's classification.
pub type Classification = Result<DependencyCategory, Arc<FileDepsError>>;

type InFlight = Arc<OnceCell<Classification>>;

/// Classifies digests against the remote store.
///
/// Scoped to one resolution: each distinct digest is queried at most once,
/// and concurrent callers for the same digest wait for the first query
/// instead of issuing their own.
pub struct DependencyClassifier<'a> {
    authority: &'a dyn RemoteAuthority,
    config: &'a ResolveConfig,
    in_flight: Mutex<HashMap<ContentDigest, InFlight>>,
}

impl<'a> DependencyClassifier<'a> {
    pub fn new(authority: &'a dyn RemoteAuthority, config: &'a ResolveConfig) -> Self {
        Self {
            authority,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the category of `digest`, querying the authority on first use.
    pub async fn classify(&self, digest: &ContentDigest, size: u64) -> Classification {
        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(digest.clone()).or_default())
        };
        cell.get_or_init(|| self.query(digest, size)).await.clone()
    }

    /// Number of distinct digests seen so far.
    pub async fn distinct_digests(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn query(&self, digest: &ContentDigest, size: u64) -> Classification {
        let request = QueryExistenceRequest {
            file_hash: digest.to_string(),
            principal: self.config.principal.clone(),
        };

        let response = retry(&self.config.retry, "query_existence", || {
            timed(
                self.config.call_timeout,
                "query_existence",
                self.authority.query_existence(request.clone()),
            )
        })
        .await
        .map_err(Arc::new)?;

        if !response.response.success {
            return Err(Arc::new(FileDepsError::FileTransfer(format!(
                "existence query for {} failed: {}",
                digest.short(),
                response.response.message
            ))));
        }

        let category =
            DependencyCategory::from_existence(response.exists, response.referenced_by_principal);
        debug!(digest = %digest.short(), size, ?category, "classified");
        Ok(category)
    }
}
