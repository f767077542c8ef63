//! Durable sync queue
//!
//! Items live in the record store; the queue adds dequeue ordering
//! (priority band first, then arrival sequence), the one-in-flight rule,
//! and the operator commands. Survives restarts: `open` reconciles items
//! left in `syncing` by a process that died mid-upload.
//!
//! An upload result that cannot be written is held in the slot and written
//! before anything else is dequeued, so the store never has two items in
//! `syncing`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SyncError;
use crate::storage::RecordStore;
use crate::types::{SyncItem, SyncStatus, TransitionError};

/// Item counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub syncing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.completed + self.failed
    }
}

/// The single worker slot
#[derive(Debug, Default)]
enum Slot {
    #[default]
    Idle,
    /// Dequeued and uploading
    InFlight(SyncItem),
    /// Finished, but the new status is not in the store yet
    Unsettled(SyncItem),
}

impl Slot {
    fn item_id(&self) -> Option<Uuid> {
        match self {
            Slot::Idle => None,
            Slot::InFlight(item) | Slot::Unsettled(item) => Some(item.id()),
        }
    }
}

pub struct SyncQueue {
    records: RecordStore,
    slot: Mutex<Slot>,
}

impl SyncQueue {
    /// Open the queue, repairing state left by an interrupted process.
    pub fn open(records: RecordStore) -> Result<Self, SyncError> {
        let report = records.reconcile()?;
        let queue = Self {
            records,
            slot: Mutex::new(Slot::Idle),
        };

        let stats = queue.stats()?;
        if stats.pending > 0 || stats.failed > 0 {
            info!(
                pending = stats.pending,
                failed = stats.failed,
                reverted = report.reverted_to_pending,
                "Sync queue has items awaiting upload"
            );
        }
        Ok(queue)
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    fn slot_guard(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Item holding the worker slot: uploading, or finished with its
    /// result not yet written.
    pub fn in_flight(&self) -> Option<Uuid> {
        self.slot_guard().item_id()
    }

    pub fn get(&self, id: Uuid) -> Result<Option<SyncItem>, SyncError> {
        Ok(self.records.load_sync_item(id)?)
    }

    /// Every item in arrival order.
    pub fn list(&self) -> Result<Vec<SyncItem>, SyncError> {
        Ok(self.records.load_sync_items()?)
    }

    /// Pending items in dequeue order.
    pub fn pending(&self) -> Result<Vec<SyncItem>, SyncError> {
        let mut pending: Vec<SyncItem> = self
            .list()?
            .into_iter()
            .filter(|item| item.status() == SyncStatus::Pending)
            .collect();
        pending.sort_by_key(SyncItem::dequeue_key);
        Ok(pending)
    }

    /// The pending item that would be dequeued next, without claiming it.
    pub fn next_pending(&self) -> Result<Option<SyncItem>, SyncError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|item| item.status() == SyncStatus::Pending)
            .min_by_key(SyncItem::dequeue_key))
    }

    pub fn stats(&self) -> Result<QueueStats, SyncError> {
        let mut stats = QueueStats::default();
        for item in self.list()? {
            match item.status() {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::Syncing => stats.syncing += 1,
                SyncStatus::Completed => stats.completed += 1,
                SyncStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    // ========================================================================
    // Worker transitions
    // ========================================================================

    /// Claim the next pending item and move it to `syncing`.
    ///
    /// A held upload result is written first; while that write fails,
    /// nothing is dequeued.
    pub fn dequeue(&self) -> Result<Option<SyncItem>, SyncError> {
        let mut slot = self.slot_guard();
        if let Slot::InFlight(busy) = &*slot {
            return Err(SyncError::Busy(busy.id()));
        }
        if let Slot::Unsettled(held) = &*slot {
            self.records.update_sync_item(held)?;
            info!(item_id = %held.id(), status = %held.status(), "Held sync result written");
        }
        *slot = Slot::Idle;

        let Some(mut item) = self.next_pending()? else {
            return Ok(None);
        };

        item.transition(SyncStatus::Syncing)?;
        self.records.update_sync_item(&item)?;
        *slot = Slot::InFlight(item.clone());

        debug!(
            item_id = %item.id(),
            batch_id = %item.batch_id(),
            priority = %item.priority(),
            "Sync item dequeued"
        );
        Ok(Some(item))
    }

    /// `syncing -> completed`
    pub fn complete(&self, id: Uuid) -> Result<SyncItem, SyncError> {
        self.finish(id, |item| item.transition(SyncStatus::Completed))
    }

    /// `syncing -> failed`, recording the error and counting the attempt.
    pub fn fail(&self, id: Uuid, error: &str) -> Result<SyncItem, SyncError> {
        self.finish(id, |item| item.record_failure(error))
    }

    /// `syncing -> pending` after a cancelled upload. Not counted as an attempt.
    pub fn revert(&self, id: Uuid) -> Result<SyncItem, SyncError> {
        self.finish(id, |item| item.transition(SyncStatus::Pending))
    }

    /// Apply a transition out of `syncing` and release the slot.
    ///
    /// If the write fails the transitioned item stays in the slot as
    /// unsettled; the next `dequeue` writes it before claiming anything.
    fn finish<F>(&self, id: Uuid, apply: F) -> Result<SyncItem, SyncError>
    where
        F: FnOnce(&mut SyncItem) -> Result<(), TransitionError>,
    {
        let mut slot = self.slot_guard();
        let held = slot.item_id() == Some(id);
        let mut item = match &*slot {
            Slot::InFlight(item) if item.id() == id => item.clone(),
            _ => self.load(id)?,
        };
        apply(&mut item)?;

        if let Err(e) = self.records.update_sync_item(&item) {
            if matches!(&*slot, Slot::InFlight(current) if current.id() == id) {
                warn!(
                    item_id = %id,
                    status = %item.status(),
                    error = %e,
                    "Sync result not written, holding it until storage recovers"
                );
                *slot = Slot::Unsettled(item);
            }
            return Err(e.into());
        }
        if held {
            *slot = Slot::Idle;
        }
        Ok(item)
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    /// `failed -> pending`. The retry count is kept.
    pub fn retry(&self, id: Uuid) -> Result<SyncItem, SyncError> {
        let mut item = self.load(id)?;
        if item.status() != SyncStatus::Failed {
            return Err(TransitionError {
                id,
                from: item.status(),
                to: SyncStatus::Pending,
            }
            .into());
        }
        item.transition(SyncStatus::Pending)?;
        self.records.update_sync_item(&item)?;
        info!(item_id = %id, retry_count = item.retry_count(), "Failed item re-queued");
        Ok(item)
    }

    /// Re-queue every failed item. Returns how many were re-queued.
    pub fn retry_all_failed(&self) -> Result<usize, SyncError> {
        let failed: Vec<Uuid> = self
            .list()?
            .into_iter()
            .filter(|item| item.status() == SyncStatus::Failed)
            .map(|item| item.id())
            .collect();
        for id in &failed {
            self.retry(*id)?;
        }
        Ok(failed.len())
    }

    /// Remove a failed item. Its batch record stays in the store.
    pub fn clear(&self, id: Uuid) -> Result<(), SyncError> {
        let item = self.load(id)?;
        if item.status() != SyncStatus::Failed {
            return Err(SyncError::NotClearable {
                id,
                status: item.status(),
            });
        }
        self.records.remove_sync_item(id)?;
        warn!(
            item_id = %id,
            batch_id = %item.batch_id(),
            last_error = ?item.last_error(),
            "Failed item cleared"
        );
        Ok(())
    }

    /// Drop completed items. Returns how many were removed.
    pub fn purge_completed(&self) -> Result<usize, SyncError> {
        let completed: Vec<Uuid> = self
            .list()?
            .into_iter()
            .filter(|item| item.status() == SyncStatus::Completed)
            .map(|item| item.id())
            .collect();
        self.records.remove_sync_items(&completed)?;
        if !completed.is_empty() {
            info!(count = completed.len(), "Completed items purged");
        }
        Ok(completed.len())
    }

    fn load(&self, id: Uuid) -> Result<SyncItem, SyncError> {
        self.records.load_sync_item(id)?.ok_or(SyncError::NotFound(id))
    }
}
