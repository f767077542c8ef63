//! Data directory lock
//!
//! One tally process per data directory: sled refuses a second opener and
//! batch commits assume a single writer. The lock is a file created with
//! `create_new` and holding the owner's PID, so two processes racing for
//! it cannot both win.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

const LOCK_FILE_NAME: &str = ".timber-tally.lock";

/// A stale lock is removed and creation retried once
const ACQUIRE_ATTEMPTS: usize = 2;

/// What an existing lock file says about its owner
#[derive(Debug, Clone, PartialEq, Eq)]
enum LockOwner {
    /// A live tally process
    Live(u32),
    /// Created but PID not written yet
    Starting,
    /// Dead process, this process, or unreadable contents
    Stale(String),
}

/// Lock on a data directory, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
}

impl ProcessLock {
    /// Take the lock for `data_dir`, creating the directory if needed.
    ///
    /// Fails if another tally process holds it.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let lock_path = data_dir.join(LOCK_FILE_NAME);

        for _ in 0..ACQUIRE_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(mut file) => {
                    let pid = std::process::id();
                    let written = writeln!(file, "{pid}").and_then(|()| file.sync_all());
                    if let Err(e) = written {
                        remove_if_present(&lock_path)?;
                        return Err(e).with_context(|| {
                            format!("Failed to write PID to {}", lock_path.display())
                        });
                    }
                    debug!(pid, path = %lock_path.display(), "Data directory lock acquired");
                    return Ok(Self { lock_path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    match read_owner(&lock_path) {
                        LockOwner::Live(pid) => bail!(
                            "Another timber-tally process (PID {pid}) is using {}\n\
                             Wait for it to finish, or remove {} if it is gone",
                            data_dir.display(),
                            lock_path.display()
                        ),
                        LockOwner::Starting => bail!(
                            "Another timber-tally process is starting in {}\n\
                             Remove {} if no other process is running",
                            data_dir.display(),
                            lock_path.display()
                        ),
                        LockOwner::Stale(reason) => {
                            info!(
                                path = %lock_path.display(),
                                reason = %reason,
                                "Removing stale lock file"
                            );
                            remove_if_present(&lock_path)?;
                        }
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create lock file {}", lock_path.display())
                    });
                }
            }
        }

        bail!(
            "Lock file {} reappeared while acquiring; another process is competing for it",
            lock_path.display()
        )
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.lock_path) {
            Ok(()) => debug!(path = %self.lock_path.display(), "Data directory lock released"),
            Err(e) => warn!(
                path = %self.lock_path.display(),
                error = %e,
                "Failed to remove lock file"
            ),
        }
    }
}

/// Remove `path`; already gone is fine (a competing process got there first).
fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove lock file {}", path.display())),
    }
}

fn read_owner(path: &Path) -> LockOwner {
    match fs::read_to_string(path) {
        Ok(contents) => classify(&contents, std::process::id(), is_tally_process),
        // Removed between create_new and here; the next attempt will tell
        Err(e) if e.kind() == io::ErrorKind::NotFound => LockOwner::Stale("already removed".into()),
        Err(e) => LockOwner::Stale(format!("unreadable: {e}")),
    }
}

fn classify(contents: &str, own_pid: u32, is_running: impl Fn(u32) -> bool) -> LockOwner {
    let contents = contents.trim();
    if contents.is_empty() {
        return LockOwner::Starting;
    }
    match contents.parse::<u32>() {
        Ok(pid) if pid == own_pid => LockOwner::Stale(format!("left by this PID ({pid})")),
        Ok(pid) if is_running(pid) => LockOwner::Live(pid),
        Ok(pid) => LockOwner::Stale(format!("PID {pid} is not running")),
        Err(_) => LockOwner::Stale(format!("not a PID: {contents:?}")),
    }
}

#[cfg(unix)]
fn is_tally_process(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .map(|cmdline| cmdline.contains("timber-tally") || cmdline.contains("timber_tally"))
        .unwrap_or(false)
}

// No portable process table; assume the owner is alive
#[cfg(not(unix))]
fn is_tally_process(_pid: u32) -> bool {
    true
}
