//! Sync worker — moves queued items through the uploader one at a time

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{SyncError, SyncQueue, UploadError, Uploader};

/// What happened to one dequeued item
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(Uuid),
    Failed { id: Uuid, error: UploadError },
    /// Upload abandoned; the item is back in `pending`
    Cancelled(Uuid),
}

/// Totals for one `drain` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Stopped early because the link went down
    pub transport_down: bool,
}

pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    uploader: Arc<dyn Uploader>,
    upload_timeout: Duration,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<SyncQueue>,
        uploader: Arc<dyn Uploader>,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            uploader,
            upload_timeout,
        }
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn uploader(&self) -> &Arc<dyn Uploader> {
        &self.uploader
    }

    /// Upload the next pending item, if any.
    ///
    /// Cancelling `cancel` while the upload is in flight puts the item back
    /// to `pending`. A timeout counts as a failed attempt.
    pub async fn process_next(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<SyncOutcome>, SyncError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let Some(item) = self.queue.dequeue()? else {
            return Ok(None);
        };
        let id = item.id();

        debug!(
            item_id = %id,
            batch_id = %item.batch_id(),
            uploader = self.uploader.name(),
            "Uploading sync item"
        );

        let upload =
            tokio::time::timeout(self.upload_timeout, self.uploader.upload(item.payload()));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = upload => {
                Some(result.unwrap_or(Err(UploadError::Timeout(self.upload_timeout))))
            }
        };

        let outcome = match result {
            None => {
                self.queue.revert(id)?;
                info!(item_id = %id, "Upload cancelled, item back to pending");
                SyncOutcome::Cancelled(id)
            }
            Some(Ok(())) => {
                self.queue.complete(id)?;
                info!(item_id = %id, batch_id = %item.batch_id(), "Batch synced");
                SyncOutcome::Completed(id)
            }
            Some(Err(error)) => {
                let failed = self.queue.fail(id, &error.to_string())?;
                warn!(
                    item_id = %id,
                    error = %error,
                    retry_count = failed.retry_count(),
                    "Upload failed, item awaiting retry"
                );
                SyncOutcome::Failed { id, error }
            }
        };
        Ok(Some(outcome))
    }

    /// Upload pending items until the queue is empty, the link goes down,
    /// or `cancel` fires.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<DrainReport, SyncError> {
        let mut report = DrainReport::default();

        while let Some(outcome) = self.process_next(cancel).await? {
            match outcome {
                SyncOutcome::Completed(_) => report.completed += 1,
                SyncOutcome::Cancelled(_) => {
                    report.cancelled = true;
                    break;
                }
                SyncOutcome::Failed { error, .. } => {
                    report.failed += 1;
                    if error.is_transport() {
                        report.transport_down = true;
                        break; // Stop on first transport failure
                    }
                }
            }
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
        }

        if report.completed > 0 || report.failed > 0 {
            info!(
                completed = report.completed,
                failed = report.failed,
                cancelled = report.cancelled,
                "Sync pass finished"
            );
        }
        Ok(report)
    }
}
