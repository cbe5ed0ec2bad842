//! Worker process supervision.
//!
//! The supervisor spawns worker processes (this binary with the hidden
//! `worker run` verb), persists their pids, and stops them with a graceful
//! terminate signal followed by heartbeat cleanup. Liveness is read back
//! from the per-worker heartbeat files the loops maintain.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{info, warn};

const PIDS_FILE: &str = "workers.pids";

/// Grace period between signaling workers and reaping their artifacts.
const STOP_GRACE: Duration = Duration::from_millis(1500);

/// A heartbeat older than this no longer counts as alive.
const LIVENESS_WINDOW: Duration = Duration::from_secs(10);

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No worker pids were tracked; nothing to do.
    NoWorkers,
    /// This many workers were signaled to stop.
    Signaled(usize),
}

/// Manages the set of worker processes for one data directory.
pub struct WorkerSupervisor {
    data_dir: PathBuf,
}

impl WorkerSupervisor {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn pids_path(&self) -> PathBuf {
        self.data_dir.join(PIDS_FILE)
    }

    fn read_pids(&self) -> Vec<u32> {
        let Ok(raw) = fs::read_to_string(self.pids_path()) else {
            return Vec::new();
        };
        // A corrupt pid list is treated as empty rather than fatal.
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn write_pids(&self, pids: &[u32]) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let raw = serde_json::to_string(pids)?;
        fs::write(self.pids_path(), raw).context("failed to persist worker pid list")?;
        Ok(())
    }

    /// Spawn `count` worker processes and track their pids.
    pub fn start(&self, count: u32) -> Result<Vec<u32>> {
        fs::create_dir_all(&self.data_dir)?;

        let exe = std::env::current_exe().context("failed to locate worker executable")?;

        let mut pids = self.read_pids();
        let mut started = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let child = std::process::Command::new(&exe)
                .args(["worker", "run"])
                .spawn()
                .context("failed to spawn worker process")?;

            started.push(child.id());
            pids.push(child.id());
        }

        self.write_pids(&pids)?;
        info!(pids = ?started, "started {} worker(s)", count);

        Ok(started)
    }

    /// Signal every tracked worker to stop, wait out the grace period, then
    /// reap heartbeat files and clear the pid list.
    ///
    /// Idempotent: with nothing tracked this reports [`StopOutcome::NoWorkers`].
    pub fn stop(&self) -> Result<StopOutcome> {
        let pids = self.read_pids();
        if pids.is_empty() {
            return Ok(StopOutcome::NoWorkers);
        }

        for pid in &pids {
            terminate(*pid);
        }

        // Let workers finish their current iteration and remove their own
        // heartbeat files.
        std::thread::sleep(STOP_GRACE);

        for pid in &pids {
            let hb = self.data_dir.join(format!("worker-{pid}.hb"));
            if let Err(e) = fs::remove_file(&hb) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %hb.display(), error = %e, "failed to remove heartbeat file");
                }
            }
        }

        let _ = fs::remove_file(self.pids_path());
        info!(count = pids.len(), "workers signaled to stop");

        Ok(StopOutcome::Signaled(pids.len()))
    }

    /// Count workers whose heartbeat file was refreshed within the liveness
    /// window.
    pub fn live_workers(&self) -> usize {
        count_fresh_heartbeats(&self.data_dir, LIVENESS_WINDOW)
    }
}

fn count_fresh_heartbeats(dir: &Path, window: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let now = SystemTime::now();
    entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("worker-") || !name.ends_with(".hb") {
                return false;
            }
            entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age < window)
        })
        .count()
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, error = %e, "failed to signal worker");
    }
}

#[cfg(windows)]
fn terminate(pid: u32) {
    use std::process::Stdio;

    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}
