//! In-memory persistence for testing and minimal deployments
//!
//! Thread-safe via `RwLock`. Not durable: data is lost on restart. Writes
//! can be made to fail on demand or once a byte quota is exceeded. A write
//! can also land and still report failure, as a failed flush does on disk.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use super::{list_key, PersistentStore, StorageError, WriteBatch, WriteOp};

pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    sequence: AtomicU64,
    fail_writes: AtomicBool,
    fail_next_flush: AtomicBool,
    quota_bytes: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
            fail_next_flush: AtomicBool::new(false),
            quota_bytes: None,
        }
    }

    /// Store that rejects writes once it would hold more than `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota_bytes: Some(bytes),
            ..Self::new()
        }
    }

    /// Make every subsequent write fail with `StorageError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let the next `apply` write its ops, then report `Unavailable`.
    pub fn fail_next_flush(&self) {
        self.fail_next_flush.store(true, Ordering::SeqCst);
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(
        &self,
        entries: &BTreeMap<String, Vec<u8>>,
        adding: usize,
    ) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated write failure".to_string()));
        }
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            if used + adding > quota {
                return Err(StorageError::Unavailable(format!(
                    "quota exceeded: {} + {} bytes > {} bytes",
                    used, adding, quota
                )));
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStore for InMemoryStore {
    fn save(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        self.check_writable(&entries, key.len() + value.len())?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn append_to_list(&self, list: &str, id: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = list_key(list, id);
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        if entries.contains_key(&key) {
            return Err(StorageError::Duplicate(key));
        }
        self.check_writable(&entries, key.len() + value.len())?;
        entries.insert(key, value.to_vec());
        Ok(())
    }

    fn load_list(&self, list: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let prefix = list_key(list, "");
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        // Checked before touching the map, so a rejected batch leaves no trace
        self.check_writable(&entries, batch.payload_bytes())?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        if self.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated flush failure".to_string()));
        }
        Ok(())
    }

    fn next_sequence(&self) -> Result<u64, StorageError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
