//! Timber Tally: round-log volume tally with offline batch sync
//!
//! ## Architecture
//!
//! - **Calculation**: measurement validation and GOST 2708-75 volume formula
//! - **Batch**: aggregates validated logs and commits them as one unit
//! - **Storage**: durable store with atomic batch + sync-item writes
//! - **Sync**: priority queue and worker delivering batches when online

pub mod batch;
pub mod calculation;
pub mod config;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export configuration
pub use config::TallyConfig;

// Re-export commonly used types
pub use types::{
    Batch, BatchContext, BatchId, BatchStatus, CommittedBatch, Measurement, SyncItem, SyncPayload,
    SyncPriority, SyncStatus,
};

// Re-export the pipeline components
pub use batch::{BatchAggregator, BatchError, CommitOutcome};
pub use calculation::{CalculationError, MeasurementValidator, Violation, VolumeCalculator};
pub use storage::{InMemoryStore, PersistentStore, RecordStore, SledStore, StorageError};
pub use sync::{SimulatedUploader, SyncError, SyncQueue, SyncWorker, UploadError, Uploader};
