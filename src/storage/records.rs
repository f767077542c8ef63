//! Typed batch and sync-item records
//!
//! Persisted shape: a `batches` list keyed by batch id and a parallel
//! `sync_items` list keyed by item id. Each batch embeds its ordered
//! measurements; each sync item embeds the batch payload it will upload.
//!
//! A batch and its sync item are only ever written together, in one atomic
//! write batch, so a crash can never leave one without the other.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{list_key, PersistentStore, StorageError, WriteBatch};
use crate::types::{BatchId, CommittedBatch, SyncItem, SyncStatus};

pub const BATCHES_LIST: &str = "batches";
pub const SYNC_ITEMS_LIST: &str = "sync_items";

/// Repairs made by `RecordStore::reconcile`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Items found in `syncing` after a restart and put back to `pending`
    pub reverted_to_pending: usize,
    /// Items whose batch record no longer exists
    pub orphans_removed: usize,
    /// Sync item records that could not be deserialized and were removed
    pub corrupt_records: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Typed access to committed batches and the sync queue records.
#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn PersistentStore>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn next_sequence(&self) -> Result<u64, StorageError> {
        self.store.next_sequence()
    }

    // ========================================================================
    // Batches
    // ========================================================================

    /// Write `batch` and its `item` in one atomic batch.
    ///
    /// A retry of a write that landed but reported failure is detected by
    /// calculation id:
    /// - same logs: the stored sync item is returned and nothing is written;
    /// - logs changed while the item is still `pending`: the stored batch is
    ///   replaced and `item` takes the place of the stored item, atomically;
    /// - otherwise `Duplicate`.
    pub fn commit_batch(
        &self,
        batch: &CommittedBatch,
        item: &SyncItem,
    ) -> Result<SyncItem, StorageError> {
        let batch_key = list_key(BATCHES_LIST, batch.batch_id().as_str());
        let mut writes = WriteBatch::new();

        if let Some(existing) = self.load_batch(batch.batch_id())? {
            if existing.calculation_id() != batch.calculation_id() {
                return Err(StorageError::Duplicate(batch_key));
            }
            match self.find_sync_item_for_batch(batch.batch_id())? {
                Some(stored) if existing.same_contents(batch) => {
                    debug!(
                        batch_id = %batch.batch_id(),
                        "Batch already committed, replaying stored sync item"
                    );
                    return Ok(stored);
                }
                Some(stored) if stored.status() == SyncStatus::Pending => {
                    warn!(
                        batch_id = %batch.batch_id(),
                        stored_logs = existing.measurements().len(),
                        logs = batch.measurements().len(),
                        "Replacing batch left by an unconfirmed commit"
                    );
                    writes.remove(list_key(SYNC_ITEMS_LIST, &stored.id().to_string()));
                }
                _ => return Err(StorageError::Duplicate(batch_key)),
            }
        }

        writes
            .put(batch_key, serde_json::to_vec(batch)?)
            .put(
                list_key(SYNC_ITEMS_LIST, &item.id().to_string()),
                serde_json::to_vec(item)?,
            );
        self.store.apply(writes)?;

        debug!(
            batch_id = %batch.batch_id(),
            item_id = %item.id(),
            backend = self.store.backend_name(),
            "Batch and sync item written"
        );
        Ok(item.clone())
    }

    pub fn load_batch(&self, batch_id: &BatchId) -> Result<Option<CommittedBatch>, StorageError> {
        match self.store.load(&list_key(BATCHES_LIST, batch_id.as_str()))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All committed batches, oldest commit first. Corrupt records are skipped.
    pub fn load_batches(&self) -> Result<Vec<CommittedBatch>, StorageError> {
        let mut batches: Vec<CommittedBatch> = self
            .store
            .load_list(BATCHES_LIST)?
            .into_iter()
            .filter_map(|(id, bytes)| match serde_json::from_slice(&bytes) {
                Ok(batch) => Some(batch),
                Err(e) => {
                    error!(batch_id = %id, error = %e, "Corrupted batch record, skipping");
                    None
                }
            })
            .collect();
        batches.sort_by_key(CommittedBatch::committed_at);
        Ok(batches)
    }

    // ========================================================================
    // Sync Items
    // ========================================================================

    pub fn load_sync_item(&self, id: Uuid) -> Result<Option<SyncItem>, StorageError> {
        match self.store.load(&list_key(SYNC_ITEMS_LIST, &id.to_string()))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All sync items in arrival order. Corrupt records are skipped.
    pub fn load_sync_items(&self) -> Result<Vec<SyncItem>, StorageError> {
        self.load_sync_items_partitioned().map(|(items, _)| items)
    }

    pub fn find_sync_item_for_batch(
        &self,
        batch_id: &BatchId,
    ) -> Result<Option<SyncItem>, StorageError> {
        Ok(self
            .load_sync_items()?
            .into_iter()
            .find(|item| item.batch_id() == batch_id))
    }

    /// Overwrite an existing sync item.
    pub fn update_sync_item(&self, item: &SyncItem) -> Result<(), StorageError> {
        let key = list_key(SYNC_ITEMS_LIST, &item.id().to_string());
        if self.store.load(&key)?.is_none() {
            return Err(StorageError::NotFound(key));
        }
        self.store.save(&key, &serde_json::to_vec(item)?)
    }

    pub fn remove_sync_item(&self, id: Uuid) -> Result<(), StorageError> {
        let key = list_key(SYNC_ITEMS_LIST, &id.to_string());
        if self.store.load(&key)?.is_none() {
            return Err(StorageError::NotFound(key));
        }
        let mut writes = WriteBatch::new();
        writes.remove(key);
        self.store.apply(writes)
    }

    /// Remove several items in one atomic write.
    pub fn remove_sync_items(&self, ids: &[Uuid]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut writes = WriteBatch::new();
        for id in ids {
            writes.remove(list_key(SYNC_ITEMS_LIST, &id.to_string()));
        }
        self.store.apply(writes)
    }

    /// Decodable items in arrival order, plus the ids of corrupt records.
    fn load_sync_items_partitioned(&self) -> Result<(Vec<SyncItem>, Vec<String>), StorageError> {
        let mut items = Vec::new();
        let mut corrupt = Vec::new();
        for (id, bytes) in self.store.load_list(SYNC_ITEMS_LIST)? {
            match serde_json::from_slice::<SyncItem>(&bytes) {
                Ok(item) => items.push(item),
                Err(e) => {
                    error!(item_id = %id, error = %e, "Corrupted sync item record, skipping");
                    corrupt.push(id);
                }
            }
        }
        items.sort_by_key(SyncItem::sequence);
        Ok((items, corrupt))
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Repair state left behind by an interrupted process.
    ///
    /// - `syncing` items had an upload in flight when the process died;
    ///   they go back to `pending`.
    /// - Sync items whose batch record is missing are removed.
    /// - Sync item records that no longer decode are removed.
    ///
    /// Batches without a sync item are left alone: the operator may have
    /// cleared a failed item on purpose.
    pub fn reconcile(&self) -> Result<ReconcileReport, StorageError> {
        let (items, corrupt) = self.load_sync_items_partitioned()?;
        let mut report = ReconcileReport {
            corrupt_records: corrupt.len(),
            ..ReconcileReport::default()
        };

        let mut writes = WriteBatch::new();
        for id in corrupt {
            writes.remove(list_key(SYNC_ITEMS_LIST, &id));
        }
        for mut item in items {
            if self.load_batch(item.batch_id())?.is_none() {
                warn!(
                    item_id = %item.id(),
                    batch_id = %item.batch_id(),
                    "Sync item has no batch record, removing"
                );
                writes.remove(list_key(SYNC_ITEMS_LIST, &item.id().to_string()));
                report.orphans_removed += 1;
                continue;
            }
            if item.status() == SyncStatus::Syncing {
                if let Err(e) = item.transition(SyncStatus::Pending) {
                    warn!(error = %e, "Could not revert interrupted upload");
                    continue;
                }
                writes.put(
                    list_key(SYNC_ITEMS_LIST, &item.id().to_string()),
                    serde_json::to_vec(&item)?,
                );
                report.reverted_to_pending += 1;
            }
        }

        if !writes.is_empty() {
            self.store.apply(writes)?;
        }

        if report.is_clean() {
            debug!("Record store consistent, nothing to reconcile");
        } else {
            info!(
                reverted = report.reverted_to_pending,
                orphans = report.orphans_removed,
                corrupt = report.corrupt_records,
                "Record store reconciled"
            );
        }
        Ok(report)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::VolumeCalculator;
    use crate::storage::InMemoryStore;
    use crate::types::{Batch, BatchContext, Measurement, SyncPayload, SyncPriority};
    use chrono::Utc;

    fn committed(diameters: &[f64]) -> CommittedBatch {
        open_batch(diameters).snapshot(Utc::now())
    }

    fn open_batch(diameters: &[f64]) -> Batch {
        let calc = VolumeCalculator::default();
        let mut batch = Batch::start(BatchContext {
            species: "birch".to_string(),
            standard_id: "GOST-2708-75".to_string(),
            length_m: 4.0,
            operator: "op".to_string(),
            transport: "TRK-9".to_string(),
            location: "Block 5".to_string(),
        });
        for d in diameters {
            batch.push_measurement(Measurement::measure(*d, 4.0, &calc).unwrap());
        }
        batch
    }

    fn log(diameter: f64) -> Measurement {
        Measurement::measure(diameter, 4.0, &VolumeCalculator::default()).unwrap()
    }

    fn setup() -> (Arc<InMemoryStore>, RecordStore) {
        let mem = Arc::new(InMemoryStore::new());
        let records = RecordStore::new(mem.clone());
        (mem, records)
    }

    fn item_for(records: &RecordStore, batch: &CommittedBatch, priority: SyncPriority) -> SyncItem {
        let seq = records.next_sequence().unwrap();
        SyncItem::new(SyncPayload::new(batch.clone(), "tally-test"), priority, seq)
    }

    #[test]
    fn test_commit_writes_batch_and_item() {
        let (_mem, records) = setup();
        let batch = committed(&[20.0, 30.0]);
        let item = item_for(&records, &batch, SyncPriority::Medium);
        records.commit_batch(&batch, &item).unwrap();

        assert_eq!(records.load_batch(batch.batch_id()).unwrap(), Some(batch.clone()));
        let items = records.load_sync_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].batch_id(), batch.batch_id());
    }

    #[test]
    fn test_failed_commit_writes_nothing() {
        let (mem, records) = setup();
        let batch = committed(&[25.0]);
        let item = item_for(&records, &batch, SyncPriority::High);

        mem.set_fail_writes(true);
        let err = records.commit_batch(&batch, &item).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        mem.set_fail_writes(false);

        assert!(records.load_batches().unwrap().is_empty());
        assert!(records.load_sync_items().unwrap().is_empty());
    }

    #[test]
    fn test_commit_is_idempotent_for_same_batch() {
        let (_mem, records) = setup();
        let batch = committed(&[25.0]);
        let first = item_for(&records, &batch, SyncPriority::Low);
        records.commit_batch(&batch, &first).unwrap();

        let second = item_for(&records, &batch, SyncPriority::Low);
        let stored = records.commit_batch(&batch, &second).unwrap();
        assert_eq!(stored.id(), first.id());
        assert_eq!(records.load_sync_items().unwrap().len(), 1);
    }

    #[test]
    fn test_update_missing_item_is_not_found() {
        let (_mem, records) = setup();
        let batch = committed(&[25.0]);
        let item = item_for(&records, &batch, SyncPriority::Low);
        assert!(matches!(
            records.update_sync_item(&item),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            records.remove_sync_item(item.id()),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_reconcile_reverts_interrupted_upload() {
        let (_mem, records) = setup();
        let batch = committed(&[25.0]);
        let mut item = item_for(&records, &batch, SyncPriority::Medium);
        records.commit_batch(&batch, &item).unwrap();

        item.transition(SyncStatus::Syncing).unwrap();
        records.update_sync_item(&item).unwrap();

        let report = records.reconcile().unwrap();
        assert_eq!(report.reverted_to_pending, 1);
        let reloaded = records.load_sync_item(item.id()).unwrap().unwrap();
        assert_eq!(reloaded.status(), SyncStatus::Pending);

        // second pass has nothing to do
        assert!(records.reconcile().unwrap().is_clean());
    }

    #[test]
    fn test_reconcile_removes_orphan_items() {
        let (mem, records) = setup();
        let batch = committed(&[25.0]);
        let item = item_for(&records, &batch, SyncPriority::Medium);
        // simulate a store written by something that skipped the batch record
        mem.append_to_list(
            SYNC_ITEMS_LIST,
            &item.id().to_string(),
            &serde_json::to_vec(&item).unwrap(),
        )
        .unwrap();

        let report = records.reconcile().unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert!(records.load_sync_items().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_records_are_skipped_then_removed() {
        let (mem, records) = setup();
        mem.append_to_list(SYNC_ITEMS_LIST, "garbage", b"{not json").unwrap();
        assert!(records.load_sync_items().unwrap().is_empty());
        assert_eq!(records.reconcile().unwrap().corrupt_records, 1);

        assert!(mem.load(&list_key(SYNC_ITEMS_LIST, "garbage")).unwrap().is_none());
        assert!(records.reconcile().unwrap().is_clean());
    }

    #[test]
    fn test_recommit_with_more_logs_replaces_pending_item() {
        let (_mem, records) = setup();
        let mut batch = open_batch(&[25.0]);
        let first = batch.snapshot(Utc::now());
        let first_item = item_for(&records, &first, SyncPriority::Medium);
        records.commit_batch(&first, &first_item).unwrap();

        // same calculation, one more log
        batch.push_measurement(log(40.0));
        let grown = batch.snapshot(Utc::now());
        let grown_item = item_for(&records, &grown, SyncPriority::Medium);
        let stored = records.commit_batch(&grown, &grown_item).unwrap();

        assert_eq!(stored.id(), grown_item.id());
        assert_eq!(records.load_batch(first.batch_id()).unwrap(), Some(grown.clone()));
        let items = records.load_sync_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload().batch.measurements().len(), 2);
    }

    #[test]
    fn test_recommit_after_upload_started_is_duplicate() {
        let (_mem, records) = setup();
        let mut batch = open_batch(&[25.0]);
        let first = batch.snapshot(Utc::now());
        let mut first_item = item_for(&records, &first, SyncPriority::Medium);
        records.commit_batch(&first, &first_item).unwrap();
        first_item.transition(SyncStatus::Syncing).unwrap();
        records.update_sync_item(&first_item).unwrap();

        batch.push_measurement(log(40.0));
        let grown = batch.snapshot(Utc::now());
        let grown_item = item_for(&records, &grown, SyncPriority::Medium);
        assert!(matches!(
            records.commit_batch(&grown, &grown_item),
            Err(StorageError::Duplicate(_))
        ));
        assert_eq!(records.load_batch(first.batch_id()).unwrap(), Some(first));
    }
}
