//! Batch value objects
//!
//! A `Batch` is the open, in-memory tally for one calculation session.
//! Committing it produces a `CommittedBatch`, the immutable snapshot that
//! gets persisted and uploaded.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Measurement;

// ============================================================================
// Batch Identifier
// ============================================================================

/// Characters allowed in the random suffix of a batch id
const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random suffix
const SUFFIX_LEN: usize = 6;

/// Batch identifier in `YYYYMMDD-XXXXXX` form.
///
/// The suffix is 6 random uppercase alphanumerics. No uniqueness service is
/// consulted; collisions are detected at commit time by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId(String);

impl BatchId {
    /// Generate a new id for `date` using the given random source.
    pub fn generate<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> Self {
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self(format!("{}-{}", date.format("%Y%m%d"), suffix))
    }

    /// Generate an id for today's UTC date.
    pub fn generate_today() -> Self {
        Self::generate(Utc::now().date_naive(), &mut rand::thread_rng())
    }

    /// Parse and validate an id string.
    pub fn parse(raw: &str) -> Result<Self, BatchIdError> {
        let (date_part, suffix) = raw
            .split_once('-')
            .ok_or_else(|| BatchIdError::Format(raw.to_string()))?;

        if date_part.len() != 8 || !date_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BatchIdError::Format(raw.to_string()));
        }
        NaiveDate::parse_from_str(date_part, "%Y%m%d")
            .map_err(|_| BatchIdError::InvalidDate(date_part.to_string()))?;

        if suffix.len() != SUFFIX_LEN || !suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)) {
            return Err(BatchIdError::Format(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calendar date encoded in the id
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.0.get(..8)?, "%Y%m%d").ok()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BatchId {
    type Error = BatchIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BatchId> for String {
    fn from(id: BatchId) -> Self {
        id.0
    }
}

impl std::str::FromStr for BatchId {
    type Err = BatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Batch id parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchIdError {
    #[error("batch id '{0}' is not in YYYYMMDD-XXXXXX form")]
    Format(String),
    #[error("batch id date '{0}' is not a calendar date")]
    InvalidDate(String),
}

// ============================================================================
// Batch Context and Status
// ============================================================================

/// Attributes shared by every log in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchContext {
    /// Tree species (pine, spruce, birch, ...)
    pub species: String,
    /// Measurement standard, e.g. "GOST-2708-75"
    pub standard_id: String,
    /// Default log length for the batch in meters
    pub length_m: f64,
    pub operator: String,
    /// Truck / wagon identifier
    pub transport: String,
    pub location: String,
}

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Accepting measurements
    Open,
    /// Persisted and queued; immutable
    Committed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Open => write!(f, "open"),
            BatchStatus::Committed => write!(f, "committed"),
        }
    }
}

// ============================================================================
// Open Batch
// ============================================================================

/// In-memory tally for one calculation session.
///
/// Mutation goes through `BatchAggregator`, which owns validation and volume
/// calculation. The total volume is always derived from the measurements.
#[derive(Debug, Clone)]
pub struct Batch {
    batch_id: BatchId,
    calculation_id: Uuid,
    context: BatchContext,
    measurements: Vec<Measurement>,
    status: BatchStatus,
    started_at: DateTime<Utc>,
}

impl Batch {
    /// Start a new open batch with a freshly generated id.
    pub fn start(context: BatchContext) -> Self {
        Self::with_id(BatchId::generate_today(), context)
    }

    /// Start a new open batch with a caller-supplied id.
    pub fn with_id(batch_id: BatchId, context: BatchContext) -> Self {
        Self {
            batch_id,
            calculation_id: Uuid::new_v4(),
            context,
            measurements: Vec::new(),
            status: BatchStatus::Open,
            started_at: Utc::now(),
        }
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Correlates the batch and its sync payload to the originating session
    pub fn calculation_id(&self) -> Uuid {
        self.calculation_id
    }

    pub fn context(&self) -> &BatchContext {
        &self.context
    }

    /// Measurements in insertion order
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == BatchStatus::Open
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Sum of measurement volumes in insertion order.
    pub fn total_volume(&self) -> f64 {
        total_volume(&self.measurements)
    }

    pub(crate) fn push_measurement(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    pub(crate) fn remove_measurement(&mut self, id: Uuid) -> Option<Measurement> {
        let idx = self.measurements.iter().position(|m| m.id() == id)?;
        Some(self.measurements.remove(idx))
    }

    /// Immutable snapshot of this batch as committed at `committed_at`.
    ///
    /// Does not change the batch status; the aggregator flips it only once
    /// the snapshot is durably stored.
    pub(crate) fn snapshot(&self, committed_at: DateTime<Utc>) -> CommittedBatch {
        CommittedBatch {
            batch_id: self.batch_id.clone(),
            calculation_id: self.calculation_id,
            context: self.context.clone(),
            measurements: self.measurements.clone(),
            status: BatchStatus::Committed,
            started_at: self.started_at,
            committed_at,
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.status = BatchStatus::Committed;
    }
}

// ============================================================================
// Committed Batch
// ============================================================================

/// Immutable, persisted form of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedBatch {
    batch_id: BatchId,
    calculation_id: Uuid,
    context: BatchContext,
    measurements: Vec<Measurement>,
    status: BatchStatus,
    started_at: DateTime<Utc>,
    committed_at: DateTime<Utc>,
}

impl CommittedBatch {
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn calculation_id(&self) -> Uuid {
        self.calculation_id
    }

    pub fn context(&self) -> &BatchContext {
        &self.context
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn total_volume(&self) -> f64 {
        total_volume(&self.measurements)
    }

    /// Same calculation with the same logs, ignoring commit time.
    pub fn same_contents(&self, other: &CommittedBatch) -> bool {
        self.calculation_id == other.calculation_id
            && self.context == other.context
            && self.measurements == other.measurements
    }
}

fn total_volume(measurements: &[Measurement]) -> f64 {
    measurements.iter().map(Measurement::volume_m3).sum()
}
