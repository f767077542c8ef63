//! Offline sync: durable priority queue and the worker that drains it
//!
//! - `SyncQueue`: priority-then-FIFO view over the stored sync items, with
//!   the one-in-flight rule and the operator commands (retry, clear, purge)
//! - `SyncWorker`: takes one item at a time through `Uploader::upload`
//! - `runner::run_sync_loop`: periodic drain with optional backoff retry

mod queue;
pub mod runner;
mod uploader;
mod worker;

pub use queue::{QueueStats, SyncQueue};
pub use runner::{backoff_secs, run_sync_loop};
pub use uploader::{SimulatedUploader, Uploader};
pub use worker::{DrainReport, SyncOutcome, SyncWorker};

use std::time::Duration;

use uuid::Uuid;

use crate::storage::StorageError;
use crate::types::{SyncStatus, TransitionError};

/// Queue and worker errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("sync item {0} not found")]
    NotFound(Uuid),
    /// Only one item per queue may be in `syncing`
    #[error("sync item {0} is already in flight")]
    Busy(Uuid),
    #[error("sync item {id} is {status}; only failed items can be cleared")]
    NotClearable { id: Uuid, status: SyncStatus },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why an upload did not go through. Recorded on the item as `lastError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// Remote answered and refused the payload
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
}

impl UploadError {
    /// The link itself is down; further uploads this round will fail too.
    pub fn is_transport(&self) -> bool {
        matches!(self, UploadError::Transport(_) | UploadError::Timeout(_))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for the sync tests

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{UploadError, Uploader};
    use crate::calculation::VolumeCalculator;
    use crate::storage::{InMemoryStore, RecordStore};
    use crate::types::{Batch, BatchContext, Measurement, SyncItem, SyncPayload, SyncPriority};

    pub fn records() -> (Arc<InMemoryStore>, RecordStore) {
        let mem = Arc::new(InMemoryStore::new());
        let records = RecordStore::new(mem.clone());
        (mem, records)
    }

    /// Commit a one-log batch straight through the record store.
    pub fn enqueue(records: &RecordStore, priority: SyncPriority) -> SyncItem {
        let calc = VolumeCalculator::default();
        let mut batch = Batch::start(BatchContext {
            species: "pine".to_string(),
            standard_id: "GOST-2708-75".to_string(),
            length_m: 6.0,
            operator: "op".to_string(),
            transport: "TRK-7".to_string(),
            location: "Block 1".to_string(),
        });
        batch.push_measurement(Measurement::measure(25.0, 6.0, &calc).unwrap());
        let committed = batch.snapshot(Utc::now());
        let seq = records.next_sequence().unwrap();
        let item = SyncItem::new(SyncPayload::new(committed.clone(), "tally-test"), priority, seq);
        records.commit_batch(&committed, &item).unwrap()
    }

    /// Uploader that replays a script of results, then succeeds.
    #[derive(Default)]
    pub struct ScriptedUploader {
        script: Mutex<VecDeque<Result<(), UploadError>>>,
        pub uploaded: Mutex<Vec<SyncPayload>>,
        pub delay: Option<Duration>,
    }

    impl ScriptedUploader {
        pub fn new(script: Vec<Result<(), UploadError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn uploaded_count(&self) -> usize {
            self.uploaded.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Uploader for ScriptedUploader {
        async fn upload(&self, payload: &SyncPayload) -> Result<(), UploadError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            if next.is_ok() {
                self.uploaded.lock().unwrap().push(payload.clone());
            }
            next
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}
