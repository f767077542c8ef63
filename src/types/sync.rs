//! Sync queue items and their state machine
//!
//! ```text
//! pending ─dequeue─▶ syncing ──complete──▶ completed
//!    ▲                 │  │
//!    │   cancel/revert │  └──fail──▶ failed ──clear──▶ (removed)
//!    └─────────────────┘                │
//!    ▲                                  │
//!    └─────────────── retry ────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use uuid::Uuid;

use super::{BatchId, CommittedBatch};

/// Dequeue precedence band
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPriority::Low => write!(f, "low"),
            SyncPriority::Medium => write!(f, "medium"),
            SyncPriority::High => write!(f, "high"),
            SyncPriority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for SyncPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(SyncPriority::Low),
            "medium" => Ok(SyncPriority::Medium),
            "high" => Ok(SyncPriority::High),
            "critical" => Ok(SyncPriority::Critical),
            other => Err(format!(
                "unknown priority '{other}' (expected low, medium, high or critical)"
            )),
        }
    }
}

/// Upload state of a sync item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl SyncStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Syncing -> Pending` is the cancellation edge; `Failed -> Pending` is
    /// the operator retry edge. `Completed` is terminal.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::Syncing)
                | (SyncStatus::Syncing, SyncStatus::Completed)
                | (SyncStatus::Syncing, SyncStatus::Failed)
                | (SyncStatus::Syncing, SyncStatus::Pending)
                | (SyncStatus::Failed, SyncStatus::Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SyncStatus::Completed
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Rejected state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sync item {id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: Uuid,
    pub from: SyncStatus,
    pub to: SyncStatus,
}

/// What gets uploaded for one committed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    /// Session correlation id
    pub calculation_id: Uuid,
    /// Device that produced the batch
    pub device_id: String,
    pub total_volume_m3: f64,
    pub batch: CommittedBatch,
}

impl SyncPayload {
    pub fn new(batch: CommittedBatch, device_id: impl Into<String>) -> Self {
        Self {
            calculation_id: batch.calculation_id(),
            device_id: device_id.into(),
            total_volume_m3: batch.total_volume(),
            batch,
        }
    }
}

/// Durable queue entry, created 1:1 with a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    id: Uuid,
    /// Back-reference to the batch record
    batch_id: BatchId,
    payload: SyncPayload,
    priority: SyncPriority,
    status: SyncStatus,
    retry_count: u32,
    last_error: Option<String>,
    /// Store-assigned arrival order, used for FIFO within a priority band
    sequence: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SyncItem {
    /// New pending item for `payload`.
    pub fn new(payload: SyncPayload, priority: SyncPriority, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id: payload.batch.batch_id().clone(),
            payload,
            priority,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            sequence,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn payload(&self) -> &SyncPayload {
        &self.payload
    }

    pub fn priority(&self) -> SyncPriority {
        self.priority
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Sort key: higher priority first, then arrival order.
    pub fn dequeue_key(&self) -> (Reverse<SyncPriority>, u64) {
        (Reverse(self.priority), self.sequence)
    }

    /// Apply a state change, enforcing the state machine.
    pub(crate) fn transition(&mut self, next: SyncStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `syncing -> failed`, counting the attempt and keeping the reason.
    pub(crate) fn record_failure(
        &mut self,
        error: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(SyncStatus::Failed)?;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Batch, BatchContext, Measurement};
    use crate::calculation::VolumeCalculator;

    fn payload() -> SyncPayload {
        let calc = VolumeCalculator::default();
        let mut batch = Batch::start(BatchContext {
            species: "spruce".to_string(),
            standard_id: "GOST-2708-75".to_string(),
            length_m: 4.0,
            operator: "op".to_string(),
            transport: "TRK-1".to_string(),
            location: "Block 2".to_string(),
        });
        batch.push_measurement(Measurement::measure(30.0, 4.0, &calc).unwrap());
        SyncPayload::new(batch.snapshot(Utc::now()), "tally-01")
    }

    #[test]
    fn test_priority_ordering() {
        assert!(SyncPriority::Critical > SyncPriority::High);
        assert!(SyncPriority::High > SyncPriority::Medium);
        assert!(SyncPriority::Medium > SyncPriority::Low);
        assert_eq!("HIGH".parse::<SyncPriority>(), Ok(SyncPriority::High));
        assert!("urgent".parse::<SyncPriority>().is_err());
    }

    #[test]
    fn test_allowed_transitions() {
        use SyncStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Completed));
        assert!(Syncing.can_transition_to(Failed));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_forbidden_transitions() {
        use SyncStatus::*;
        // no skipping syncing on the way to completed
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        // completed is terminal
        for next in [Pending, Syncing, Failed] {
            assert!(!Completed.can_transition_to(next));
        }
        // failed only goes back through an explicit retry
        assert!(!Failed.can_transition_to(Syncing));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = SyncItem::new(payload(), SyncPriority::High, 3);
        assert_eq!(item.status(), SyncStatus::Pending);
        assert_eq!(item.retry_count(), 0);
        assert!(item.last_error().is_none());
        assert_eq!(item.batch_id(), item.payload().batch.batch_id());
        assert_eq!(item.payload().calculation_id, item.payload().batch.calculation_id());
    }

    #[test]
    fn test_record_failure_counts_attempts() {
        let mut item = SyncItem::new(payload(), SyncPriority::Low, 1);
        item.transition(SyncStatus::Syncing).unwrap();
        item.record_failure("503 from remote").unwrap();
        assert_eq!(item.status(), SyncStatus::Failed);
        assert_eq!(item.retry_count(), 1);
        assert_eq!(item.last_error(), Some("503 from remote"));

        // failing again without a new attempt is rejected
        let err = item.record_failure("again").unwrap_err();
        assert_eq!(err.from, SyncStatus::Failed);
        assert_eq!(item.retry_count(), 1);
    }

    #[test]
    fn test_dequeue_key_orders_priority_then_sequence() {
        let p = payload();
        let mut items = vec![
            SyncItem::new(p.clone(), SyncPriority::Medium, 1),
            SyncItem::new(p.clone(), SyncPriority::Critical, 2),
            SyncItem::new(p.clone(), SyncPriority::Low, 3),
            SyncItem::new(p, SyncPriority::High, 4),
        ];
        items.sort_by_key(SyncItem::dequeue_key);
        let seqs: Vec<u64> = items.iter().map(SyncItem::sequence).collect();
        assert_eq!(seqs, vec![2, 4, 1, 3]);
    }
}
