use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::UploadProgress;

/// Callback invoked with upload progress.
pub type ProgressCallback = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Delivers upload progress to an observer without ever stalling the upload.
///
/// Updates go through a single-slot channel that keeps only the newest
/// value. A slow observer sees fewer, coalesced updates; the last update
/// reported before [`finish`](Self::finish) is always delivered.
pub struct ProgressReporter {
    tx: Arc<watch::Sender<Option<UploadProgress>>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProgressReporter {
    /// Starts the observer task. Must be called within a tokio runtime.
    pub fn spawn(callback: ProgressCallback) -> Self {
        let (tx, mut rx) = watch::channel::<Option<UploadProgress>>(None);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut last_delivered: Option<UploadProgress> = None;
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let latest = rx.borrow_and_update().clone();
                        if let Some(progress) = latest {
                            callback(progress.clone());
                            last_delivered = Some(progress);
                        }
                    }
                    _ = &mut stop_rx => {
                        break;
                    }
                }
            }

            // Flush an update that arrived after the last delivery.
            let final_value = rx.borrow().clone();
            if let Some(progress) = final_value
                && last_delivered.as_ref() != Some(&progress)
            {
                callback(progress);
            }
        });

        Self {
            tx: Arc::new(tx),
            stop: Some(stop_tx),
            task,
        }
    }

    /// Returns a handle the upload path reports through.
    pub fn sink(&self) -> ProgressSink {
        ProgressSink {
            tx: Some(Arc::clone(&self.tx)),
        }
    }

    /// Stops the observer after delivering the latest update.
    pub async fn finish(mut self) {
        // Dropping the sender signals the task to exit.
        drop(self.stop.take());
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "progress observer task failed");
        }
    }
}

/// Cheap, cloneable reporting handle. Reporting never blocks.
///
/// The default sink discards every update.
#[derive(Clone, Default)]
pub struct ProgressSink {
    tx: Option<Arc<watch::Sender<Option<UploadProgress>>>>,
}

impl ProgressSink {
    /// Replaces the pending update with `progress`.
    pub fn report(&self, progress: UploadProgress) {
        if let Some(tx) = &self.tx {
            tx.send_replace(Some(progress));
        }
    }
}
