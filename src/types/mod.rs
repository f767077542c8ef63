//! Shared data structures for the tally pipeline
//!
//! - `Measurement`: one measured log (diameter, length, derived volume)
//! - `Batch` / `CommittedBatch`: ordered measurements sharing a context
//! - `SyncItem`: durable upload queue entry for one committed batch

mod measurement;
mod batch;
mod sync;

pub use measurement::*;
pub use batch::*;
pub use sync::*;
