//! Upload seam between the sync worker and the remote endpoint

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::UploadError;
use crate::config::SyncConfig;
use crate::types::SyncPayload;

/// Remote endpoint for committed batches.
///
/// The transport is supplied by the integrator. The remote is expected to
/// dedupe on `calculation_id`: an item whose completion was not persisted
/// before a crash is uploaded again after restart.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, payload: &SyncPayload) -> Result<(), UploadError>;

    /// Cheap connectivity check made before each drain.
    async fn is_reachable(&self) -> bool {
        true
    }

    /// Name for logging
    fn name(&self) -> &str;
}

/// Stand-in remote with configurable latency and failure rate.
pub struct SimulatedUploader {
    latency: Duration,
    failure_rate: f64,
    reachable: AtomicBool,
}

impl SimulatedUploader {
    pub fn new(latency: Duration, failure_rate: f64) -> Self {
        Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            Duration::from_millis(config.simulated_latency_ms),
            config.simulated_failure_rate,
        )
    }

    /// Toggle the simulated link.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Uploader for SimulatedUploader {
    async fn upload(&self, payload: &SyncPayload) -> Result<(), UploadError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(UploadError::Transport("network unreachable".to_string()));
        }

        tokio::time::sleep(self.latency).await;

        let roll: f64 = rand::thread_rng().gen();
        if roll < self.failure_rate {
            return Err(UploadError::Rejected("remote returned 503".to_string()));
        }

        debug!(
            calculation_id = %payload.calculation_id,
            batch_id = %payload.batch.batch_id(),
            bytes = serde_json::to_vec(payload).map(|b| b.len()).unwrap_or(0),
            "Simulated upload accepted"
        );
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
