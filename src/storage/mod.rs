//! Durable local storage
//!
//! `PersistentStore` is a flat key-value abstraction with named lists and
//! atomic multi-key writes. Backends:
//! - `SledStore`: sled database on device storage (production)
//! - `InMemoryStore`: non-durable store with failure injection (tests)
//!
//! `RecordStore` layers the typed batch / sync-item records on top and owns
//! the rule that a batch and its sync item are written in one atomic batch.

pub mod lockfile;
mod memory;
mod records;
mod sled_store;

pub use lockfile::ProcessLock;
pub use memory::InMemoryStore;
pub use records::{ReconcileReport, RecordStore, BATCHES_LIST, SYNC_ITEMS_LIST};
pub use sled_store::SledStore;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The medium cannot be written or read (disk full, quota, I/O failure)
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: Vec<u8> },
    Remove { key: String },
}

/// Writes applied all-or-nothing by `PersistentStore::apply`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value,
        });
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Remove { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Bytes this batch would add (keys plus values)
    pub fn payload_bytes(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                WriteOp::Put { key, value } => key.len() + value.len(),
                WriteOp::Remove { .. } => 0,
            })
            .sum()
    }

    pub(crate) fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Key of entry `id` inside list `list`
pub fn list_key(list: &str, id: &str) -> String {
    format!("{list}/{id}")
}

/// Trait for pluggable persistence backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks, and every write must be atomic with respect to
/// process interruption.
pub trait PersistentStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Value under `key`, if present.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert entry `id` into `list`. Fails with `Duplicate` if it exists.
    fn append_to_list(&self, list: &str, id: &str, value: &[u8]) -> Result<(), StorageError>;

    /// All entries of `list` as `(id, value)`, ordered by id.
    fn load_list(&self, list: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    /// Apply every op in `batch`, or none of them.
    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Monotonic sequence number, unique for the lifetime of the store.
    fn next_sequence(&self) -> Result<u64, StorageError>;

    /// Make previous writes durable.
    fn flush(&self) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
