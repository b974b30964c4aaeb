//! Transfer orchestration.
//!
//! [`FileManager`] turns a list of `(local path, mount path)` mappings into
//! a [`Resolution`]. A resolution runs in phases, each finishing before the
//! next starts:
//!
//! 1. **Validate** mount paths and local sources (no remote calls yet)
//! 2. **Prepare** package directories and hash every source
//! 3. **Plan the tree** so mount conflicts fail before any remote call
//! 4. **Classify** each distinct digest against the store
//! 5. **Check quota** against a fresh snapshot, before any upload
//! 6. **Transfer** upload NEW content, register EXISTING_UNREFERENCED
//! 7. **Assemble** the dependency set, mount tree and failure list

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use desam_protocol::{
    JobSpec, JobSubmission, QueryQuotaRequest, RegisterReferenceRequest, UploadContentRequest,
};
use desam_transfer::{
    ChunkReader, ContentDigest, ProgressCallback, ProgressReporter, ProgressSink, TransferError,
    UploadProgress, digest_file, file_size, is_directory_mount, is_packaged_archive,
    package_directory, validate_mount_path,
};
use futures_util::{StreamExt, stream};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::RemoteAuthority;
use crate::classifier::{Classification, DependencyClassifier};
use crate::config::{ResolveConfig, ResolveMode};
use crate::error::FileDepsError;
use crate::job::JobSubmitter;
use crate::quota::QuotaTracker;
use crate::retry::{retry, timed};
use crate::tree::{FileTreeBuilder, FileTreeNode};
use crate::types::{
    DataDependency, DependencyCategory, DependencySet, FileInfo, FileMapping, ItemFailure,
    QuotaInfo, Resolution,
};

/// Chunks buffered between the file reader and the store.
const UPLOAD_QUEUE_DEPTH: usize = 2;

type Observer = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// A validated mapping.
#[derive(Debug, Clone)]
struct LocalSource {
    index: usize,
    local_path: PathBuf,
    mount_path: String,
    is_dir: bool,
}

/// A mapping whose content has been packaged and hashed.
#[derive(Debug, Clone)]
struct PreparedItem {
    index: usize,
    local_path: PathBuf,
    mount_path: String,
    /// The file actually uploaded: the source itself or its package.
    upload_path: PathBuf,
    name: String,
    digest: ContentDigest,
    size: u64,
}

/// Resolves, uploads and describes the data a job depends on.
///
/// Each call owns its own dedup state and quota snapshot; nothing is
/// shared between calls except the cancellation token.
pub struct FileManager<'a> {
    authority: &'a dyn RemoteAuthority,
    config: ResolveConfig,
    cancel: CancellationToken,
    observer: Option<Observer>,
}

impl<'a> FileManager<'a> {
    pub fn new(authority: &'a dyn RemoteAuthority, config: ResolveConfig) -> Self {
        Self {
            authority,
            config,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    /// Reports upload progress of resolutions and batch uploads to `observer`.
    ///
    /// Updates are coalesced; a slow observer never stalls an upload.
    /// Concurrent uploads share one slot, so the last update delivered is
    /// the latest overall, and intermediate items may skip their final one.
    pub fn with_progress(mut self, observer: impl Fn(UploadProgress) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Returns the token that cancels every operation of this manager.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    /// Queries the principal's current quota.
    pub async fn check_quota(&self) -> Result<QuotaInfo, FileDepsError> {
        self.cancellable(self.query_quota())
            .await
            .map(|tracker| tracker.info())
    }

    /// Resolves `mappings` in the configured [`ResolveMode`].
    pub async fn resolve(&self, mappings: &[FileMapping]) -> Result<Resolution, FileDepsError> {
        self.cancellable(self.run_resolution(mappings, self.config.mode))
            .await
    }

    /// Uploads one file (or packaged directory) outside a resolution.
    ///
    /// Content already in the store is registered or reused instead of
    /// uploaded again.
    pub async fn upload_single(
        &self,
        path: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<FileInfo, FileDepsError> {
        let reporter = progress.map(ProgressReporter::spawn);
        let sink = reporter
            .as_ref()
            .map(ProgressReporter::sink)
            .unwrap_or_default();

        let result = self
            .cancellable(async {
                let source = local_source(0, path, String::new()).await?;
                let staging = TempDir::new()?;
                let item = prepare(&source, staging.path()).await?;
                let classifier = DependencyClassifier::new(self.authority, &self.config);
                self.commit(&classifier, &item, &sink).await
            })
            .await;

        drop(sink);
        if let Some(reporter) = reporter {
            reporter.finish().await;
        }
        result
    }

    /// Uploads several files, stopping at the first failure.
    ///
    /// Content repeated within the batch is handled once; later copies get
    /// the earlier [`FileInfo`] without any remote call.
    pub async fn upload_files(&self, paths: &[PathBuf]) -> Result<Vec<FileInfo>, FileDepsError> {
        let reporter = self.spawn_reporter();
        let sink = reporter
            .as_ref()
            .map(ProgressReporter::sink)
            .unwrap_or_default();

        let result = self
            .cancellable(async {
                let mut sources = Vec::with_capacity(paths.len());
                for (index, path) in paths.iter().enumerate() {
                    sources.push(local_source(index, path, String::new()).await?);
                }

                let staging = TempDir::new()?;
                let classifier = DependencyClassifier::new(self.authority, &self.config);
                let mut handled: HashMap<ContentDigest, FileInfo> = HashMap::new();
                let mut infos = Vec::with_capacity(sources.len());
                for source in &sources {
                    let item = prepare(source, staging.path()).await?;
                    if let Some(info) = handled.get(&item.digest) {
                        debug!(
                            path = %item.local_path.display(),
                            digest = %item.digest.short(),
                            "duplicate content in batch"
                        );
                        infos.push(info.clone());
                        continue;
                    }
                    let info = self.commit(&classifier, &item, &sink).await?;
                    handled.insert(item.digest.clone(), info.clone());
                    infos.push(info);
                }
                Ok(infos)
            })
            .await;

        drop(sink);
        if let Some(reporter) = reporter {
            reporter.finish().await;
        }
        result
    }

    /// Builds the mount tree of `mappings` locally, without remote calls.
    pub async fn build_file_tree(
        &self,
        mappings: &[FileMapping],
    ) -> Result<FileTreeNode, FileDepsError> {
        self.cancellable(async {
            let sources = validate(mappings).await?;
            let staging = TempDir::new()?;
            let mut builder = FileTreeBuilder::new();
            for (_, prepared) in self.prepare_all(sources, staging.path()).await {
                let item = prepared?;
                builder.insert(&item.mount_path, &item.digest)?;
            }
            Ok(builder.build())
        })
        .await
    }

    /// Resolves `mappings` all-or-nothing and submits `job` with them.
    ///
    /// Returns the job id assigned by `submitter`.
    pub async fn submit_job_with_files(
        &self,
        submitter: &dyn JobSubmitter,
        job: JobSpec,
        mappings: &[FileMapping],
    ) -> Result<String, FileDepsError> {
        let resolution = self
            .cancellable(self.run_resolution(mappings, ResolveMode::AllOrNothing))
            .await?;
        let summary = resolution.summary();
        info!(
            job = %job.name,
            dependencies = resolution.dependencies.len(),
            billed_bytes = summary.total_a_b_size,
            "submitting job"
        );

        let submission = JobSubmission {
            job,
            data_dependencies: summary,
        };
        let job_id = self
            .cancellable(timed(
                self.config.call_timeout,
                "submit_job",
                submitter.submit_job(submission),
            ))
            .await
            .map_err(|e| match e {
                FileDepsError::Cancelled => e,
                other => FileDepsError::Submission(other.to_string()),
            })?;
        info!(job_id = %job_id, "job submitted");
        Ok(job_id)
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    async fn run_resolution(
        &self,
        mappings: &[FileMapping],
        mode: ResolveMode,
    ) -> Result<Resolution, FileDepsError> {
        let reporter = self.spawn_reporter();
        let sink = reporter
            .as_ref()
            .map(ProgressReporter::sink)
            .unwrap_or_default();

        let result = self.resolve_phases(mappings, mode, &sink).await;

        drop(sink);
        if let Some(reporter) = reporter {
            reporter.finish().await;
        }
        result
    }

    async fn resolve_phases(
        &self,
        mappings: &[FileMapping],
        mode: ResolveMode,
        sink: &ProgressSink,
    ) -> Result<Resolution, FileDepsError> {
        // 1. Validate
        let sources = validate(mappings).await?;
        if sources.is_empty() {
            return Ok(Resolution {
                dependencies: DependencySet::new(),
                tree: FileTreeNode::empty_dir(),
                failures: Vec::new(),
            });
        }

        // 2. Prepare
        let staging = TempDir::new()?;
        let mut failures = Vec::new();
        let mut prepared = Vec::with_capacity(sources.len());
        for (source, result) in self.prepare_all(sources, staging.path()).await {
            match result {
                Ok(item) => prepared.push(item),
                Err(e) => record_failure(
                    mode,
                    &mut failures,
                    ItemFailure {
                        local_path: source.local_path,
                        mount_path: source.mount_path,
                        digest: None,
                        error: Arc::new(e),
                    },
                )?,
            }
        }

        // 3. Plan the tree
        let mut planned = FileTreeBuilder::new();
        for item in &prepared {
            planned.insert(&item.mount_path, &item.digest)?;
        }

        // 4. Classify
        let classifier = DependencyClassifier::new(self.authority, &self.config);
        let mut ready = Vec::with_capacity(prepared.len());
        {
            let classifier = &classifier;
            let mut classifications = stream::iter(prepared)
                .map(|item| async move {
                    let classification: Classification =
                        classifier.classify(&item.digest, item.size).await;
                    (item, classification)
                })
                .buffer_unordered(self.config.concurrency);

            while let Some((item, classification)) = classifications.next().await {
                match classification {
                    Ok(category) => ready.push((item, category)),
                    Err(e) => record_failure(
                        mode,
                        &mut failures,
                        ItemFailure {
                            local_path: item.local_path,
                            mount_path: item.mount_path,
                            digest: Some(item.digest),
                            error: e,
                        },
                    )?,
                }
            }
        }
        ready.sort_by_key(|(item, _)| item.index);
        debug!(
            items = ready.len(),
            distinct = classifier.distinct_digests().await,
            "classification complete"
        );

        // 5. Check quota
        let mut plan: BTreeMap<&ContentDigest, (&PreparedItem, DependencyCategory)> =
            BTreeMap::new();
        for (item, category) in &ready {
            if *category != DependencyCategory::ExistingReferenced {
                plan.entry(&item.digest).or_insert((item, *category));
            }
        }
        let required: u64 = plan
            .values()
            .filter(|(_, category)| category.consumes_quota())
            .map(|(item, _)| item.size)
            .sum();
        if required > 0 {
            let quota = self.query_quota().await?;
            if let Err(e) = quota.check(required) {
                warn!(
                    required,
                    available = quota.info().available,
                    "quota exceeded, nothing uploaded"
                );
                return Err(e);
            }
        }

        // 6. Transfer
        let mut outcomes: HashMap<ContentDigest, Arc<FileDepsError>> = HashMap::new();
        {
            let mut transfers = stream::iter(plan.into_values())
                .map(|(item, category)| async move {
                    let result = self.transfer(item, category, sink).await;
                    (item, result)
                })
                .buffer_unordered(self.config.concurrency);

            while let Some((item, result)) = transfers.next().await {
                if let Err(e) = result {
                    let e = Arc::new(e);
                    if mode == ResolveMode::AllOrNothing || e.is_batch_fatal() {
                        return Err(FileDepsError::abort_batch(&item.mount_path, e));
                    }
                    warn!(
                        digest = %item.digest.short(),
                        mount_path = %item.mount_path,
                        error = %e,
                        "transfer failed"
                    );
                    outcomes.insert(item.digest.clone(), e);
                }
            }
        }

        // 7. Assemble
        let mut dependencies = DependencySet::new();
        let mut tree = FileTreeBuilder::new();
        for (item, category) in ready {
            if let Some(e) = outcomes.get(&item.digest) {
                failures.push(ItemFailure {
                    local_path: item.local_path,
                    mount_path: item.mount_path,
                    digest: Some(item.digest),
                    error: Arc::clone(e),
                });
                continue;
            }
            tree.insert(&item.mount_path, &item.digest)?;
            dependencies.add(DataDependency {
                local_path: item.local_path,
                mount_path: item.mount_path,
                digest: item.digest,
                size: item.size,
                category,
            });
        }
        failures.sort_by(|a, b| a.mount_path.cmp(&b.mount_path));

        info!(
            new = dependencies.new.len(),
            unreferenced = dependencies.unreferenced.len(),
            referenced = dependencies.referenced.len(),
            failed = failures.len(),
            billed_bytes = dependencies.total_a_b_size(),
            "resolution complete"
        );

        Ok(Resolution {
            dependencies,
            tree: tree.build(),
            failures,
        })
    }

    /// Packages and hashes `sources` concurrently, in input order.
    async fn prepare_all(
        &self,
        sources: Vec<LocalSource>,
        staging: &Path,
    ) -> Vec<(LocalSource, Result<PreparedItem, FileDepsError>)> {
        let mut prepared: Vec<_> = stream::iter(sources)
            .map(|source| async move {
                let result = prepare(&source, staging).await;
                (source, result)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        prepared.sort_by_key(|(source, _)| source.index);
        prepared
    }

    // -----------------------------------------------------------------------
    // Remote operations
    // -----------------------------------------------------------------------

    async fn query_quota(&self) -> Result<QuotaTracker, FileDepsError> {
        let request = QueryQuotaRequest {
            principal: self.config.principal.clone(),
        };
        let response = retry(&self.config.retry, "query_quota", || {
            timed(
                self.config.call_timeout,
                "query_quota",
                self.authority.query_quota(request.clone()),
            )
        })
        .await?;
        let tracker = QuotaTracker::from_response(&response)?;
        debug!(
            total = tracker.info().total,
            used = tracker.info().used,
            available = tracker.info().available,
            "quota queried"
        );
        Ok(tracker)
    }

    /// Classifies, checks quota and transfers one prepared item.
    async fn commit(
        &self,
        classifier: &DependencyClassifier<'_>,
        item: &PreparedItem,
        sink: &ProgressSink,
    ) -> Result<FileInfo, FileDepsError> {
        let category = classifier
            .classify(&item.digest, item.size)
            .await
            .map_err(|e| FileDepsError::abort_batch(&item.name, e))?;
        if category.consumes_quota() {
            self.query_quota().await?.check(item.size)?;
        }
        self.transfer(item, category, sink).await?;

        Ok(FileInfo {
            digest: item.digest.clone(),
            size: item.size,
            name: item.name.clone(),
            upload_time: Utc::now(),
        })
    }

    async fn transfer(
        &self,
        item: &PreparedItem,
        category: DependencyCategory,
        sink: &ProgressSink,
    ) -> Result<(), FileDepsError> {
        match category {
            DependencyCategory::New => self.upload(item, sink).await,
            DependencyCategory::ExistingUnreferenced => self.register(item).await,
            DependencyCategory::ExistingReferenced => Ok(()),
        }
    }

    async fn register(&self, item: &PreparedItem) -> Result<(), FileDepsError> {
        let request = RegisterReferenceRequest {
            file_hash: item.digest.to_string(),
            principal: self.config.principal.clone(),
        };
        let response = retry(&self.config.retry, "register_reference", || {
            timed(
                self.config.call_timeout,
                "register_reference",
                self.authority.register_reference(request.clone()),
            )
        })
        .await?;

        if !response.response.success {
            return Err(FileDepsError::FileTransfer(format!(
                "reference registration for {} failed: {}",
                item.name, response.response.message
            )));
        }
        debug!(digest = %item.digest.short(), name = %item.name, "reference registered");
        Ok(())
    }

    async fn upload(&self, item: &PreparedItem, sink: &ProgressSink) -> Result<(), FileDepsError> {
        retry(&self.config.retry, "upload_content", || {
            self.upload_once(item, sink)
        })
        .await?;
        info!(
            digest = %item.digest.short(),
            name = %item.name,
            bytes = item.size,
            "content uploaded"
        );
        Ok(())
    }

    /// One upload attempt, streaming from offset 0.
    async fn upload_once(&self, item: &PreparedItem, sink: &ProgressSink) -> Result<(), FileDepsError> {
        let (tx, rx) = mpsc::channel(UPLOAD_QUEUE_DEPTH);
        let request = UploadContentRequest {
            file_hash: item.digest.to_string(),
            file_name: item.name.clone(),
            file_size: item.size,
            principal: self.config.principal.clone(),
        };

        let mut upload = self.authority.upload_content(request, rx);
        let produce = self.stream_chunks(item, tx, sink.clone());
        tokio::pin!(produce);

        // The store may answer before the stream ends (e.g. rejecting it).
        let early = tokio::select! {
            produced = &mut produce => {
                produced?;
                None
            }
            response = &mut upload => Some(response),
        };
        let response = match early {
            Some(response) => response?,
            None => timed(self.config.call_timeout, "upload_content", upload).await?,
        };

        if !response.response.success {
            return Err(FileDepsError::FileTransfer(format!(
                "upload of {} failed: {}",
                item.name, response.response.message
            )));
        }
        match response.file_hash.parse::<ContentDigest>() {
            Ok(confirmed) if confirmed == item.digest => Ok(()),
            _ => {
                error!(
                    digest = %item.digest,
                    confirmed = %response.file_hash,
                    name = %item.name,
                    "store confirmed a different digest"
                );
                Err(FileDepsError::Integrity {
                    digest: item.digest.clone(),
                    confirmed: response.file_hash,
                })
            }
        }
    }

    /// Reads `item` in chunks and hands them to the store.
    ///
    /// Stops without error when the store closes the stream early, leaving
    /// the outcome to the store's response.
    async fn stream_chunks(
        &self,
        item: &PreparedItem,
        tx: mpsc::Sender<desam_transfer::Chunk>,
        sink: ProgressSink,
    ) -> Result<(), FileDepsError> {
        let limit = self.config.call_timeout;
        let mut reader = tokio::task::spawn_blocking({
            let path = item.upload_path.clone();
            let chunk_size = self.config.chunk_size;
            move || ChunkReader::new(&path, chunk_size)
        })
        .await??;
        let total_bytes = reader.file_size();

        loop {
            let (returned, next) = tokio::task::spawn_blocking(move || {
                let next = reader.next_chunk();
                (reader, next)
            })
            .await?;
            reader = returned;
            let Some(chunk) = next? else {
                break;
            };

            let bytes_sent = chunk.offset + chunk.size() as u64;
            match tokio::time::timeout(limit, tx.send(chunk)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // The store stopped reading; its response carries the reason.
                    debug!(
                        digest = %item.digest.short(),
                        "store closed the upload stream early"
                    );
                    return Ok(());
                }
                Err(_) => {
                    return Err(FileDepsError::Transfer(format!(
                        "chunk hand-off timed out after {}ms",
                        limit.as_millis()
                    )));
                }
            }
            sink.report(UploadProgress {
                digest: item.digest.clone(),
                name: item.name.clone(),
                bytes_sent,
                total_bytes,
            });
        }

        if total_bytes == 0 {
            sink.report(UploadProgress {
                digest: item.digest.clone(),
                name: item.name.clone(),
                bytes_sent: 0,
                total_bytes: 0,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn spawn_reporter(&self) -> Option<ProgressReporter> {
        self.observer.as_ref().map(|observer| {
            let observer = Arc::clone(observer);
            ProgressReporter::spawn(Box::new(move |progress| observer(progress)))
        })
    }

    /// Runs `work` unless the manager is cancelled first.
    async fn cancellable<T>(
        &self,
        work: impl Future<Output = Result<T, FileDepsError>>,
    ) -> Result<T, FileDepsError> {
        if self.cancel.is_cancelled() {
            return Err(FileDepsError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("operation cancelled");
                Err(FileDepsError::Cancelled)
            }
            result = work => result,
        }
    }
}

/// Records a per-item failure, or aborts when the mode or error demands it.
fn record_failure(
    mode: ResolveMode,
    failures: &mut Vec<ItemFailure>,
    failure: ItemFailure,
) -> Result<(), FileDepsError> {
    if mode == ResolveMode::AllOrNothing || failure.error.is_batch_fatal() {
        return Err(FileDepsError::abort_batch(
            &failure.mount_path,
            failure.error,
        ));
    }
    warn!(
        mount_path = %failure.mount_path,
        error = %failure.error,
        "dependency failed"
    );
    failures.push(failure);
    Ok(())
}

/// Validates every mapping before any work starts.
async fn validate(mappings: &[FileMapping]) -> Result<Vec<LocalSource>, FileDepsError> {
    let mut sources = Vec::with_capacity(mappings.len());
    for (index, mapping) in mappings.iter().enumerate() {
        validate_mount_path(&mapping.mount_path)?;
        let source = local_source(index, &mapping.local_path, mapping.mount_path.clone()).await?;

        if is_directory_mount(&mapping.mount_path) && !source.is_dir {
            let path = source.local_path.clone();
            let packaged = tokio::task::spawn_blocking(move || is_packaged_archive(&path)).await??;
            if !packaged {
                return Err(FileDepsError::InvalidMapping(format!(
                    "{} is mounted as directory {:?} but is neither a directory nor a package",
                    mapping.local_path.display(),
                    mapping.mount_path
                )));
            }
        }
        sources.push(source);
    }
    Ok(sources)
}

async fn local_source(
    index: usize,
    path: &Path,
    mount_path: String,
) -> Result<LocalSource, FileDepsError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FileDepsError::NotFound(path.to_path_buf())
        } else {
            FileDepsError::Io(e)
        }
    })?;
    Ok(LocalSource {
        index,
        local_path: path.to_path_buf(),
        mount_path,
        is_dir: metadata.is_dir(),
    })
}

/// Packages (for directories) and hashes one source on the blocking pool.
async fn prepare(source: &LocalSource, staging: &Path) -> Result<PreparedItem, FileDepsError> {
    let local_path = source.local_path.clone();
    // One staging directory per item keeps same-named packages apart.
    let staging = staging.join(source.index.to_string());
    let is_dir = source.is_dir;

    let (upload_path, digest, size) = tokio::task::spawn_blocking(move || {
        let upload_path = if is_dir {
            std::fs::create_dir_all(&staging)?;
            package_directory(&local_path, &staging)?
        } else {
            local_path
        };
        let digest = digest_file(&upload_path)?;
        let size = file_size(&upload_path)?;
        Ok::<_, TransferError>((upload_path, digest, size))
    })
    .await??;

    let name = upload_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    debug!(
        path = %source.local_path.display(),
        digest = %digest.short(),
        bytes = size,
        packaged = is_dir,
        "source prepared"
    );

    Ok(PreparedItem {
        index: source.index,
        local_path: source.local_path.clone(),
        mount_path: source.mount_path.clone(),
        upload_path,
        name,
        digest,
        size,
    })
}
