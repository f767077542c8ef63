//! Batch aggregation: open batch, add logs, commit to the sync queue

mod aggregator;

pub use aggregator::{BatchAggregator, BatchError, CommitOutcome};
