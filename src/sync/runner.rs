//! Periodic sync loop for integrators who want hands-off delivery
//!
//! The queue itself never retries on its own. With `auto_retry` enabled
//! this loop re-queues failed items once their backoff has elapsed, up to
//! `max_auto_retries` attempts; beyond that they wait for the operator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DrainReport, SyncError, SyncQueue, SyncWorker};
use crate::config::SyncConfig;
use crate::types::SyncStatus;

/// Delay after `failures` consecutive failures:
/// `base * 2^min(failures, max_exponent)`, capped at `cap_secs`.
pub fn backoff_secs(failures: u32, base_secs: u64, max_exponent: u32, cap_secs: u64) -> u64 {
    let factor = 1u64 << failures.min(max_exponent).min(63);
    base_secs.saturating_mul(factor).min(cap_secs)
}

fn jitter_secs(max: u64) -> u64 {
    if max > 0 {
        rand::thread_rng().gen_range(0..max)
    } else {
        0
    }
}

/// Re-queue failed items whose backoff has elapsed at `now`.
///
/// Items at or past `max_auto_retries` attempts are left for the operator.
pub fn requeue_due_failures(
    queue: &SyncQueue,
    config: &SyncConfig,
    now: DateTime<Utc>,
) -> Result<usize, SyncError> {
    let mut requeued = 0;
    for item in queue.list()? {
        if item.status() != SyncStatus::Failed || item.retry_count() >= config.max_auto_retries {
            continue;
        }
        let wait = backoff_secs(
            item.retry_count(),
            config.interval_secs,
            config.max_backoff_exponent,
            config.max_backoff_secs,
        );
        let elapsed = now.signed_duration_since(item.updated_at()).num_seconds();
        if elapsed >= 0 && elapsed as u64 >= wait {
            queue.retry(item.id())?;
            requeued += 1;
        }
    }
    Ok(requeued)
}

/// Drain the queue every `interval_secs` until `cancel` fires.
///
/// An unreachable remote or a dropped link backs the loop off
/// exponentially. Returns the totals over the loop's lifetime.
pub async fn run_sync_loop(
    worker: &SyncWorker,
    config: &SyncConfig,
    cancel: CancellationToken,
) -> DrainReport {
    let mut totals = DrainReport::default();
    let mut consecutive_failures: u32 = 0;

    info!(
        uploader = worker.uploader().name(),
        interval_secs = config.interval_secs,
        auto_retry = config.auto_retry,
        "Sync loop started"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if config.auto_retry {
            match requeue_due_failures(worker.queue(), config, Utc::now()) {
                Ok(0) => {}
                Ok(n) => info!(count = n, "Failed items re-queued after backoff"),
                Err(e) => warn!(error = %e, "Automatic retry pass failed"),
            }
        }

        let link_ok = if worker.uploader().is_reachable().await {
            match worker.drain(&cancel).await {
                Ok(report) => {
                    totals.completed += report.completed;
                    totals.failed += report.failed;
                    totals.cancelled |= report.cancelled;
                    !report.transport_down
                }
                Err(e) => {
                    warn!(error = %e, "Sync pass aborted");
                    false
                }
            }
        } else {
            debug!("Remote unreachable, skipping sync pass");
            false
        };

        let delay = if link_ok {
            consecutive_failures = 0;
            config.interval_secs
        } else {
            consecutive_failures = consecutive_failures.saturating_add(1);
            let backoff = backoff_secs(
                consecutive_failures,
                config.interval_secs,
                config.max_backoff_exponent,
                config.max_backoff_secs,
            );
            warn!(consecutive_failures, next_retry_secs = backoff, "Sync unavailable, backing off");
            backoff
        };
        let sleep_for = Duration::from_secs(delay + jitter_secs(config.jitter_secs));

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    info!(completed = totals.completed, failed = totals.failed, "Sync loop stopped");
    totals
}
