//! Batch Aggregator — validated measurements in, committed batches out
//!
//! The only component that writes batches. `add_measurement` runs the
//! validator then the calculator, and touches the batch only if both pass.
//! `commit` writes the batch and its sync item atomically and closes the
//! batch only after the write succeeded.

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::calculation::{CalculationError, MeasurementValidator, Violation, VolumeCalculator};
use crate::config::TallyConfig;
use crate::storage::{RecordStore, StorageError};
use crate::types::{
    Batch, BatchContext, CommittedBatch, Measurement, SyncItem, SyncPayload, SyncPriority,
};

/// Batch usage errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error("measurement rejected: {}", join_violations(.0))]
    Validation(Vec<Violation>),
    #[error(transparent)]
    InvalidMeasurement(#[from] CalculationError),
    #[error("cannot commit an empty batch")]
    EmptyBatch,
    #[error("batch is already committed")]
    BatchClosed,
    #[error("measurement {0} not found in batch")]
    MeasurementNotFound(Uuid),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of a successful commit
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub batch: CommittedBatch,
    pub sync_item: SyncItem,
}

pub struct BatchAggregator {
    validator: MeasurementValidator,
    calculator: VolumeCalculator,
    records: RecordStore,
    device_id: String,
}

impl BatchAggregator {
    pub fn new(
        records: RecordStore,
        validator: MeasurementValidator,
        calculator: VolumeCalculator,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            validator,
            calculator,
            records,
            device_id: device_id.into(),
        }
    }

    pub fn from_config(records: RecordStore, config: &TallyConfig) -> Self {
        Self::new(
            records,
            MeasurementValidator::from_config(&config.limits),
            VolumeCalculator::with_correction_factor(config.calculation.correction_factor),
            config.site.device_id.clone(),
        )
    }

    pub fn validator(&self) -> &MeasurementValidator {
        &self.validator
    }

    pub fn calculator(&self) -> &VolumeCalculator {
        &self.calculator
    }

    /// Open a new batch for `context`.
    pub fn start_batch(&self, context: BatchContext) -> Batch {
        let batch = Batch::start(context);
        info!(
            batch_id = %batch.batch_id(),
            species = %batch.context().species,
            length_m = batch.context().length_m,
            "Batch started"
        );
        batch
    }

    /// Add a log of `diameter_cm` at the batch's default length.
    pub fn add_measurement(
        &self,
        batch: &mut Batch,
        diameter_cm: f64,
    ) -> Result<Measurement, BatchError> {
        let length_m = batch.context().length_m;
        self.add_measurement_with_length(batch, diameter_cm, length_m)
    }

    /// Add a log whose length differs from the batch default.
    pub fn add_measurement_with_length(
        &self,
        batch: &mut Batch,
        diameter_cm: f64,
        length_m: f64,
    ) -> Result<Measurement, BatchError> {
        if !batch.is_open() {
            return Err(BatchError::BatchClosed);
        }

        let violations = self.validator.validate(diameter_cm, length_m);
        if !violations.is_empty() {
            debug!(
                batch_id = %batch.batch_id(),
                diameter_cm,
                length_m,
                "Measurement rejected by validator"
            );
            return Err(BatchError::Validation(violations));
        }

        let measurement =
            Measurement::measure(diameter_cm, length_m, &self.calculator).map_err(|e| {
                // Validation should have caught this
                error!(
                    batch_id = %batch.batch_id(),
                    error = %e,
                    "Calculator rejected validated input"
                );
                BatchError::InvalidMeasurement(e)
            })?;

        batch.push_measurement(measurement.clone());
        debug!(
            batch_id = %batch.batch_id(),
            diameter_cm,
            length_m,
            volume_m3 = measurement.volume_m3(),
            count = batch.len(),
            "Measurement added"
        );
        Ok(measurement)
    }

    /// Remove a measurement from an open batch.
    pub fn remove_measurement(
        &self,
        batch: &mut Batch,
        measurement_id: Uuid,
    ) -> Result<Measurement, BatchError> {
        if !batch.is_open() {
            return Err(BatchError::BatchClosed);
        }
        let removed = batch
            .remove_measurement(measurement_id)
            .ok_or(BatchError::MeasurementNotFound(measurement_id))?;
        debug!(
            batch_id = %batch.batch_id(),
            measurement_id = %measurement_id,
            "Measurement removed"
        );
        Ok(removed)
    }

    /// Persist the batch together with a new pending sync item.
    ///
    /// On storage failure the batch stays open and unchanged so the caller
    /// can retry; nothing partial is left in the store. The returned batch
    /// is the one carried by the stored sync item.
    pub fn commit(
        &self,
        batch: &mut Batch,
        priority: SyncPriority,
    ) -> Result<CommitOutcome, BatchError> {
        if !batch.is_open() {
            return Err(BatchError::BatchClosed);
        }
        if batch.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        let committed = batch.snapshot(Utc::now());
        let payload = SyncPayload::new(committed.clone(), self.device_id.clone());

        let stored = self
            .records
            .next_sequence()
            .map(|seq| SyncItem::new(payload, priority, seq))
            .and_then(|item| self.records.commit_batch(&committed, &item))
            .map_err(|e| {
                warn!(batch_id = %batch.batch_id(), error = %e, "Commit failed, batch kept open");
                BatchError::Storage(e)
            })?;

        batch.mark_committed();
        let committed = stored.payload().batch.clone();
        info!(
            batch_id = %committed.batch_id(),
            item_id = %stored.id(),
            logs = committed.measurements().len(),
            total_volume_m3 = committed.total_volume(),
            priority = %stored.priority(),
            "Batch committed and queued for sync"
        );

        Ok(CommitOutcome {
            batch: committed,
            sync_item: stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::storage::InMemoryStore;
    use crate::types::{BatchStatus, SyncStatus};

    fn context() -> BatchContext {
        BatchContext {
            species: "pine".to_string(),
            standard_id: "GOST-2708-75".to_string(),
            length_m: 6.0,
            operator: "ivanov".to_string(),
            transport: "TRK-042".to_string(),
            location: "Block 17".to_string(),
        }
    }

    fn setup() -> (Arc<InMemoryStore>, RecordStore, BatchAggregator) {
        let mem = Arc::new(InMemoryStore::new());
        let records = RecordStore::new(mem.clone());
        let aggregator = BatchAggregator::from_config(records.clone(), &TallyConfig::default());
        (mem, records, aggregator)
    }

    #[test]
    fn test_total_volume_equals_sum_of_independent_volumes() {
        let (_mem, _records, agg) = setup();
        let mut batch = agg.start_batch(context());
        let diameters = [6.0, 14.5, 25.0, 33.3, 48.0, 120.0];

        let mut expected = 0.0;
        for d in diameters {
            agg.add_measurement(&mut batch, d).unwrap();
            expected += crate::calculation::calculate_volume(d, 6.0).unwrap();
            assert_eq!(batch.total_volume(), expected);
        }
        assert_eq!(batch.len(), diameters.len());
    }

    #[test]
    fn test_rejected_measurement_leaves_batch_unchanged() {
        let (_mem, _records, agg) = setup();
        let mut batch = agg.start_batch(context());
        agg.add_measurement(&mut batch, 25.0).unwrap();
        let before = batch.total_volume();

        let err = agg.add_measurement_with_length(&mut batch, 5.0, 16.0).unwrap_err();
        match err {
            BatchError::Validation(v) => assert_eq!(v.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.total_volume(), before);
    }

    #[test]
    fn test_length_override() {
        let (_mem, _records, agg) = setup();
        let mut batch = agg.start_batch(context());
        let m = agg.add_measurement_with_length(&mut batch, 30.0, 4.0).unwrap();
        assert_eq!(m.length_m(), 4.0);
        assert_eq!(m.volume_m3(), 0.269);
    }

    #[test]
    fn test_commit_creates_one_pending_item() {
        let (_mem, records, agg) = setup();
        let mut batch = agg.start_batch(context());
        agg.add_measurement(&mut batch, 25.0).unwrap();
        agg.add_measurement(&mut batch, 30.0).unwrap();

        let outcome = agg.commit(&mut batch, SyncPriority::High).unwrap();
        assert_eq!(batch.status(), BatchStatus::Committed);
        assert_eq!(outcome.sync_item.status(), SyncStatus::Pending);
        assert_eq!(outcome.sync_item.priority(), SyncPriority::High);
        assert_eq!(outcome.batch.total_volume(), batch.total_volume());

        let items = records.load_sync_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].batch_id(), batch.batch_id());
        assert_eq!(items[0].payload().device_id, "tally-01");
        assert_eq!(items[0].payload().calculation_id, batch.calculation_id());
    }

    #[test]
    fn test_commit_empty_batch_fails() {
        let (_mem, records, agg) = setup();
        let mut batch = agg.start_batch(context());
        assert_eq!(
            agg.commit(&mut batch, SyncPriority::Medium).unwrap_err(),
            BatchError::EmptyBatch
        );
        assert!(batch.is_open());
        assert!(records.load_sync_items().unwrap().is_empty());
    }

    #[test]
    fn test_committed_batch_is_closed() {
        let (_mem, records, agg) = setup();
        let mut batch = agg.start_batch(context());
        let m = agg.add_measurement(&mut batch, 25.0).unwrap();
        agg.commit(&mut batch, SyncPriority::Medium).unwrap();

        assert_eq!(
            agg.add_measurement(&mut batch, 30.0).unwrap_err(),
            BatchError::BatchClosed
        );
        assert_eq!(
            agg.remove_measurement(&mut batch, m.id()).unwrap_err(),
            BatchError::BatchClosed
        );
        assert_eq!(
            agg.commit(&mut batch, SyncPriority::Medium).unwrap_err(),
            BatchError::BatchClosed
        );
        assert_eq!(records.load_sync_items().unwrap().len(), 1);
    }

    #[test]
    fn test_storage_failure_keeps_batch_open() {
        let (mem, records, agg) = setup();
        let mut batch = agg.start_batch(context());
        agg.add_measurement(&mut batch, 25.0).unwrap();

        mem.set_fail_writes(true);
        let err = agg.commit(&mut batch, SyncPriority::Critical).unwrap_err();
        assert!(matches!(err, BatchError::Storage(StorageError::Unavailable(_))));
        assert!(batch.is_open());
        assert_eq!(batch.len(), 1);
        assert!(records.load_batches().unwrap().is_empty());
        assert!(records.load_sync_items().unwrap().is_empty());

        // storage back, same batch commits
        mem.set_fail_writes(false);
        agg.commit(&mut batch, SyncPriority::Critical).unwrap();
        assert_eq!(records.load_batches().unwrap().len(), 1);
        assert_eq!(records.load_sync_items().unwrap().len(), 1);
    }

    #[test]
    fn test_logs_added_after_unconfirmed_commit_are_stored() {
        let (mem, records, agg) = setup();
        let mut batch = agg.start_batch(context());
        agg.add_measurement(&mut batch, 25.0).unwrap();

        // write lands, flush reports failure
        mem.fail_next_flush();
        assert!(agg.commit(&mut batch, SyncPriority::Medium).is_err());
        assert!(batch.is_open());

        agg.add_measurement(&mut batch, 40.0).unwrap();
        let outcome = agg.commit(&mut batch, SyncPriority::Medium).unwrap();
        assert_eq!(outcome.batch.measurements().len(), 2);
        assert_eq!(outcome.sync_item.payload().batch, outcome.batch);

        let stored = records.load_batch(batch.batch_id()).unwrap().unwrap();
        assert_eq!(stored.measurements().len(), 2);
        assert_eq!(stored.total_volume(), batch.total_volume());
        let items = records.load_sync_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload().batch.measurements().len(), 2);
    }

    #[test]
    fn test_unconfirmed_commit_retried_unchanged_replays() {
        let (mem, records, agg) = setup();
        let mut batch = agg.start_batch(context());
        agg.add_measurement(&mut batch, 25.0).unwrap();

        mem.fail_next_flush();
        assert!(agg.commit(&mut batch, SyncPriority::High).is_err());
        let stored = records.load_batch(batch.batch_id()).unwrap().unwrap();

        let outcome = agg.commit(&mut batch, SyncPriority::High).unwrap();
        assert_eq!(outcome.batch, stored);
        assert_eq!(records.load_sync_items().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_measurement() {
        let (_mem, _records, agg) = setup();
        let mut batch = agg.start_batch(context());
        let a = agg.add_measurement(&mut batch, 25.0).unwrap();
        let b = agg.add_measurement(&mut batch, 40.0).unwrap();

        let removed = agg.remove_measurement(&mut batch, a.id()).unwrap();
        assert_eq!(removed.id(), a.id());
        assert_eq!(batch.total_volume(), b.volume_m3());
        assert_eq!(
            agg.remove_measurement(&mut batch, a.id()).unwrap_err(),
            BatchError::MeasurementNotFound(a.id())
        );
    }

    #[test]
    fn test_validation_error_message_lists_every_violation() {
        let err = BatchError::Validation(crate::calculation::validate(5.0, 0.4));
        let msg = err.to_string();
        assert!(msg.contains("diameter"));
        assert!(msg.contains("length"));
    }
}
