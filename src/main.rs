//! Timber Tally - round-log volume tally for the landing and the truck
//!
//! Measures logs against GOST 2708-75, commits them as batches to a local
//! database, and drains the resulting upload queue whenever the device is
//! online.
//!
//! # Usage
//!
//! ```bash
//! # One-off volume
//! timber-tally calc --diameter 25 --length 6
//!
//! # Commit a batch (diameters as args or one per line on stdin)
//! timber-tally batch commit --species pine --length 6 --transport TRK-042 \
//!     --location "Block 17" --priority high 24 26,5 31
//!
//! # Inspect and drive the upload queue
//! timber-tally queue status
//! timber-tally sync --once
//! ```
//!
//! # Environment Variables
//!
//! - `TIMBER_TALLY_CONFIG`: Path to the TOML config file
//! - `TIMBER_TALLY_DATA_DIR`: Data directory override
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use timber_tally::storage::ProcessLock;
use timber_tally::sync::{run_sync_loop, SimulatedUploader, SyncQueue, SyncWorker};
use timber_tally::{
    BatchAggregator, BatchContext, BatchError, BatchId, MeasurementValidator, RecordStore,
    SledStore, SyncItem, SyncPriority, TallyConfig, VolumeCalculator,
};

/// Database directory inside the data dir
const DB_DIR_NAME: &str = "tally.db";

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "timber-tally")]
#[command(about = "Round-log volume tally with offline batch sync")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides $TIMBER_TALLY_CONFIG and ./timber_tally.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Data directory (overrides storage.data_dir)
    #[arg(long, global = true, env = "TIMBER_TALLY_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Validate one log and print its volume
    Calc {
        /// Diameter in cm ("25" or "25,5")
        #[arg(long)]
        diameter: String,
        /// Length in m
        #[arg(long)]
        length: String,
    },

    /// Commit and inspect batches
    Batch {
        #[command(subcommand)]
        action: BatchCommand,
    },

    /// Inspect and manage the upload queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },

    /// Upload pending batches (Ctrl+C puts the in-flight item back to pending)
    Sync {
        /// Single pass instead of the periodic loop
        #[arg(long)]
        once: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Subcommand, Debug)]
enum BatchCommand {
    /// Measure a list of logs and commit them as one batch
    Commit {
        #[arg(long)]
        species: String,
        /// Default log length in m
        #[arg(long)]
        length: f64,
        /// Defaults to site.default_operator
        #[arg(long)]
        operator: Option<String>,
        #[arg(long)]
        transport: String,
        #[arg(long)]
        location: String,
        /// Defaults to site.default_standard
        #[arg(long)]
        standard: Option<String>,
        #[arg(long, default_value = "medium")]
        priority: SyncPriority,
        /// Also read "DIAMETER [LENGTH]" lines from stdin
        #[arg(long)]
        stdin: bool,
        /// Diameters in cm
        diameters: Vec<String>,
    },
    /// List committed batches
    List,
    /// Print one committed batch as JSON
    Show { batch_id: String },
}

#[derive(clap::Subcommand, Debug)]
enum QueueCommand {
    /// Item counts per status
    Status,
    /// Every item in arrival order
    List,
    /// Re-queue a failed item
    Retry { id: Uuid },
    /// Re-queue every failed item
    RetryFailed,
    /// Remove a failed item (its batch record is kept)
    Clear { id: Uuid },
    /// Remove completed items
    Purge,
}

// ============================================================================
// Setup
// ============================================================================

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<TallyConfig> {
    match path {
        Some(p) => TallyConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(TallyConfig::load()),
    }
}

/// Open storage under an exclusive process lock.
struct Storage {
    records: RecordStore,
    _process_lock: ProcessLock,
}

fn open_storage(config: &TallyConfig, data_dir: Option<PathBuf>) -> Result<Storage> {
    let data_dir = data_dir.unwrap_or_else(|| config.storage.data_dir.clone());

    let process_lock = ProcessLock::acquire(&data_dir).context("Failed to acquire process lock")?;
    let store = SledStore::open(data_dir.join(DB_DIR_NAME), config.storage.flush_on_commit)
        .with_context(|| format!("Failed to open tally database in {}", data_dir.display()))?;

    Ok(Storage {
        records: RecordStore::new(Arc::new(store)),
        _process_lock: process_lock,
    })
}

// ============================================================================
// Commands
// ============================================================================

fn run_calc(config: &TallyConfig, diameter: &str, length: &str) -> Result<()> {
    let validator = MeasurementValidator::from_config(&config.limits);
    let calculator = VolumeCalculator::with_correction_factor(config.calculation.correction_factor);

    let (d, l) = match validator.validate_raw(diameter, length) {
        Ok(v) => v,
        Err(violations) => {
            for v in &violations {
                eprintln!("  ✗ {v}");
            }
            bail!("{} violation(s)", violations.len());
        }
    };
    let volume = calculator.calculate(d, l)?;
    println!("{volume:.3} m³  (d = {d} cm, L = {l} m, k = {})", calculator.correction_factor());
    Ok(())
}

fn run_batch_commit(
    config: &TallyConfig,
    records: RecordStore,
    context: BatchContext,
    priority: SyncPriority,
    diameters: Vec<String>,
    read_stdin: bool,
) -> Result<()> {
    let aggregator = BatchAggregator::from_config(records, config);
    let mut batch = aggregator.start_batch(context);
    let default_length = batch.context().length_m.to_string();

    let mut lines = diameters;
    if read_stdin {
        for line in std::io::stdin().lock().lines() {
            lines.push(line.context("Failed to read stdin")?);
        }
    }

    let mut rejected = 0usize;
    for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let mut parts = line.split_whitespace();
        let diameter = parts.next().unwrap_or_default();
        let length = parts.next().unwrap_or(default_length.as_str());

        let result = aggregator
            .validator()
            .validate_raw(diameter, length)
            .map_err(BatchError::Validation)
            .and_then(|(d, l)| aggregator.add_measurement_with_length(&mut batch, d, l));

        match result {
            Ok(m) => println!(
                "  + {:>6} cm × {:>5} m = {:.3} m³",
                m.diameter_cm(),
                m.length_m(),
                m.volume_m3()
            ),
            Err(e) => {
                rejected += 1;
                eprintln!("  ✗ '{line}': {e}");
            }
        }
    }

    let outcome = aggregator.commit(&mut batch, priority)?;
    println!(
        "Committed {}: {} logs, {:.3} m³, queued as {} ({})",
        outcome.batch.batch_id(),
        outcome.batch.measurements().len(),
        outcome.batch.total_volume(),
        outcome.sync_item.id(),
        priority
    );
    if rejected > 0 {
        warn!(rejected, "Some inputs were rejected and are not in the batch");
    }
    Ok(())
}

fn run_batch_list(records: &RecordStore) -> Result<()> {
    let batches = records.load_batches()?;
    if batches.is_empty() {
        println!("No committed batches");
        return Ok(());
    }
    for b in &batches {
        println!(
            "{}  {}  {:<10} {:>4} logs  {:>9.3} m³  {}",
            b.batch_id(),
            b.committed_at().format("%Y-%m-%d %H:%M"),
            b.context().species,
            b.measurements().len(),
            b.total_volume(),
            b.context().transport
        );
    }
    Ok(())
}

fn run_batch_show(records: &RecordStore, raw_id: &str) -> Result<()> {
    let id = BatchId::parse(raw_id)?;
    let batch = records
        .load_batch(&id)?
        .with_context(|| format!("Batch {id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}

fn print_item(item: &SyncItem) {
    println!(
        "{}  {}  {:<8} {:<9} retries={}  {}",
        item.id(),
        item.batch_id(),
        item.priority(),
        item.status(),
        item.retry_count(),
        item.last_error().unwrap_or("")
    );
}

fn run_queue(queue: &SyncQueue, action: QueueCommand) -> Result<()> {
    match action {
        QueueCommand::Status => {
            let stats = queue.stats()?;
            println!(
                "pending: {}  syncing: {}  completed: {}  failed: {}  (total {})",
                stats.pending,
                stats.syncing,
                stats.completed,
                stats.failed,
                stats.total()
            );
        }
        QueueCommand::List => {
            for item in queue.list()? {
                print_item(&item);
            }
        }
        QueueCommand::Retry { id } => {
            let item = queue.retry(id)?;
            print_item(&item);
        }
        QueueCommand::RetryFailed => {
            println!("Re-queued {} failed item(s)", queue.retry_all_failed()?);
        }
        QueueCommand::Clear { id } => {
            queue.clear(id)?;
            println!("Cleared {id}");
        }
        QueueCommand::Purge => {
            println!("Purged {} completed item(s)", queue.purge_completed()?);
        }
    }
    Ok(())
}

async fn run_sync(config: &TallyConfig, queue: Arc<SyncQueue>, once: bool) -> Result<()> {
    let uploader = Arc::new(SimulatedUploader::from_config(&config.sync));
    let worker = SyncWorker::new(
        queue,
        uploader,
        Duration::from_secs(config.sync.upload_timeout_secs),
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, stopping sync");
        shutdown_token.cancel();
    });

    let report = if once {
        worker.drain(&cancel_token).await?
    } else {
        run_sync_loop(&worker, &config.sync, cancel_token).await
    };

    println!(
        "Synced {} batch(es), {} failed{}",
        report.completed,
        report.failed,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Calc { diameter, length } => run_calc(&config, &diameter, &length),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Batch { action } => {
            let storage = open_storage(&config, args.data_dir)?;
            let result = match action {
                BatchCommand::Commit {
                    species,
                    length,
                    operator,
                    transport,
                    location,
                    standard,
                    priority,
                    stdin,
                    diameters,
                } => {
                    let context = BatchContext {
                        species,
                        standard_id: standard
                            .unwrap_or_else(|| config.site.default_standard.clone()),
                        length_m: length,
                        operator: operator.unwrap_or_else(|| config.site.default_operator.clone()),
                        transport,
                        location,
                    };
                    run_batch_commit(
                        &config,
                        storage.records.clone(),
                        context,
                        priority,
                        diameters,
                        stdin,
                    )
                }
                BatchCommand::List => run_batch_list(&storage.records),
                BatchCommand::Show { batch_id } => run_batch_show(&storage.records, &batch_id),
            };
            storage.records.flush()?;
            result
        }
        Command::Queue { action } => {
            let storage = open_storage(&config, args.data_dir)?;
            let queue = SyncQueue::open(storage.records.clone())?;
            let result = run_queue(&queue, action);
            storage.records.flush()?;
            result
        }
        Command::Sync { once } => {
            let storage = open_storage(&config, args.data_dir)?;
            let queue = Arc::new(SyncQueue::open(storage.records.clone())?);
            let result = run_sync(&config, queue, once).await;
            storage.records.flush()?;
            result
        }
    }
}
