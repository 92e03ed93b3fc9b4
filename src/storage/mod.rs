// Disk space manager
//
// Recordings are stored in one directory per day (YYYYMMDD) under the save
// folder. A background thread periodically removes the oldest day while the
// disk is fuller than allowed or more days are kept than configured. The
// newest remaining directory is never removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use sysinfo::Disks;

/// Default interval between checks
pub const DEFAULT_CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Error type for the disk space manager
#[derive(Debug, thiserror::Error)]
pub enum DiskSpaceError {
    #[error("Save folder not found: {0}")]
    FolderNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiskSpaceError>;

/// Limits applied to the recording folder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    /// Day directories to keep. 0 disables the limit.
    pub max_days: usize,
    /// Highest acceptable usage of the disk holding the folder, in percent
    pub max_percent_used: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_days: 7,
            max_percent_used: 90.0,
        }
    }
}

/// Reports how full the disk holding a path is
pub trait DiskUsageProbe: Send + Sync {
    /// Used space in percent, or `None` when it cannot be determined
    fn percent_used(&self, path: &Path) -> Option<f64>;
}

/// Probe backed by the system disk list
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoDiskProbe;

impl DiskUsageProbe for SysinfoDiskProbe {
    fn percent_used(&self, path: &Path) -> Option<f64> {
        let path = path.canonicalize().ok()?;
        let disks = Disks::new_with_refreshed_list();
        // The deepest mount point containing the path is the one it lives on
        let disk = disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())?;

        let total = disk.total_space();
        if total == 0 {
            return None;
        }
        let used = total.saturating_sub(disk.available_space());
        Some(used as f64 * 100.0 / total as f64)
    }
}

/// Outcome of one pruning pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PruneReport {
    pub deleted: Vec<PathBuf>,
    pub failures: Vec<PathBuf>,
    pub remaining: usize,
}

/// Day directories under `root`, oldest first
pub fn day_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(dirs)
}

/// Delete the oldest day directories until the policy is met.
///
/// A directory that fails to delete is logged and skipped; the next pass
/// retries it.
pub fn prune_recordings(
    root: &Path,
    policy: &RetentionPolicy,
    probe: &dyn DiskUsageProbe,
) -> Result<PruneReport> {
    let mut remaining = day_directories(root)?;
    let mut report = PruneReport::default();

    loop {
        let over_usage = probe
            .percent_used(root)
            .map(|used| used > policy.max_percent_used)
            .unwrap_or(false);
        let over_count = policy.max_days > 0 && remaining.len() > policy.max_days;
        if !over_usage && !over_count {
            break;
        }

        if remaining.len() <= 1 {
            if over_usage {
                log::warn!(
                    "[Disk] {} is over {:.0}% used but only the current recordings remain",
                    root.display(),
                    policy.max_percent_used
                );
            }
            break;
        }

        let oldest = remaining.remove(0);
        let reason = if over_usage { "disk usage" } else { "retention" };
        match std::fs::remove_dir_all(&oldest) {
            Ok(()) => {
                log::info!("[Disk] Deleted {} ({})", oldest.display(), reason);
                report.deleted.push(oldest);
            }
            Err(e) => {
                log::error!("[Disk] Failed to delete {}: {}", oldest.display(), e);
                report.failures.push(oldest);
            }
        }
    }

    report.remaining = remaining.len();
    Ok(report)
}

/// Background pruning of the recording folder
pub struct DiskSpaceManager {
    root: PathBuf,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DiskSpaceManager {
    pub fn new(
        root: impl Into<PathBuf>,
        policy: RetentionPolicy,
        period: Duration,
        probe: Arc<dyn DiskUsageProbe>,
    ) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(DiskSpaceError::FolderNotFound(root));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_root = root.clone();
        log::info!(
            "[Disk] Managing {} (keep {} days, max {:.0}% used, every {:?})",
            root.display(),
            policy.max_days,
            policy.max_percent_used,
            period
        );

        let handle = std::thread::Builder::new()
            .name("camguard-disk-space".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                if let Err(e) = prune_recordings(&thread_root, &policy, probe.as_ref()) {
                    log::error!("[Disk] Failed to scan {}: {}", thread_root.display(), e);
                }
            })?;

        Ok(Self {
            root,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[Disk] Manager thread for {} panicked", self.root.display());
            } else {
                log::info!("[Disk] Stopped managing {}", self.root.display());
            }
        }
    }
}

impl Drop for DiskSpaceManager {
    fn drop(&mut self) {
        self.stop();
    }
}
