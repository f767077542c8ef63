//! sled-backed persistent store
//!
//! Everything lives in the default tree. List entries are keyed
//! `<list>/<id>` so a prefix scan returns one list in id order. Multi-key
//! writes go through `apply_batch`, which sled applies atomically.

use std::path::Path;
use std::sync::Arc;

use super::{list_key, PersistentStore, StorageError, WriteBatch, WriteOp};

/// Persistent store on device storage
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    /// Flush to disk after every write instead of relying on sled's
    /// background flusher
    flush_on_write: bool,
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P, flush_on_write: bool) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;

        tracing::info!(path = %path_ref.display(), entries = db.len(), "Tally store opened");

        Ok(Self {
            db: Arc::new(db),
            flush_on_write,
        })
    }

    /// Temporary store, removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db: Arc::new(db),
            flush_on_write: false,
        })
    }

    /// Database size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    fn maybe_flush(&self) -> Result<(), StorageError> {
        if self.flush_on_write {
            self.db.flush()?;
        }
        Ok(())
    }
}

impl PersistentStore for SledStore {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.db.insert(key.as_bytes(), value)?;
        self.maybe_flush()
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn append_to_list(&self, list: &str, id: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = list_key(list, id);
        // Insert only if absent
        let swapped = self
            .db
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;
        if swapped.is_err() {
            return Err(StorageError::Duplicate(key));
        }
        self.maybe_flush()
    }

    fn load_list(&self, list: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let prefix = list_key(list, "");
        let mut entries = Vec::new();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            entries.push((id, value.to_vec()));
        }

        Ok(entries)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => sled_batch.insert(key.as_bytes(), value),
                WriteOp::Remove { key } => sled_batch.remove(key.as_bytes()),
            }
        }
        self.db.apply_batch(sled_batch)?;
        self.maybe_flush()
    }

    fn next_sequence(&self) -> Result<u64, StorageError> {
        Ok(self.db.generate_id()?)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
