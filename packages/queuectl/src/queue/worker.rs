//! Worker loop: poll, claim, execute, settle.
//!
//! One `Worker` runs per worker process. Each iteration refreshes the
//! liveness signal, tries to claim a runnable job, executes its command and
//! settles the outcome through the retry policy. A `CancellationToken` is
//! observed at iteration boundaries; an in-flight command is never
//! interrupted, so shutdown waits for the current job to finish.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::retry::RetryPolicy;
use super::store::{FailureOutcome, JobStore};
use crate::executor::{run_command, CommandOutput};
use crate::queue::Job;
use crate::settings::Settings;

/// Liveness signal the worker refreshes every iteration.
///
/// Failures are swallowed by implementations: liveness is best-effort and
/// must never take a worker down.
pub trait LivenessSink: Send + Sync {
    /// Refresh the signal.
    fn beat(&self);
    /// Best-effort removal of the signal on shutdown.
    fn clear(&self);
}

/// File-based heartbeat: one timestamp file per worker, refreshed each
/// iteration. Monitoring counts a worker as alive while the file is fresh.
pub struct FileHeartbeat {
    path: PathBuf,
}

impl FileHeartbeat {
    pub fn new(dir: &Path, worker_id: &str) -> Self {
        Self {
            path: dir.join(format!("{worker_id}.hb")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LivenessSink for FileHeartbeat {
    fn beat(&self) {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64().to_string())
            .unwrap_or_default();

        if let Err(e) = fs::write(&self.path, stamp) {
            warn!(path = %self.path.display(), error = %e, "failed to write heartbeat");
        }
    }

    fn clear(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID for this instance
    pub worker_id: String,
    /// How long to wait when no jobs are available
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Worker identity derived from the process id; also names the heartbeat
/// file so the supervisor can reap it by pid.
pub fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

/// A single worker: claims jobs from the shared store and executes them
/// until cancelled.
pub struct Worker {
    store: JobStore,
    settings: Settings,
    heartbeat: Box<dyn LivenessSink>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        store: JobStore,
        settings: Settings,
        heartbeat: Box<dyn LivenessSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            settings,
            heartbeat,
            config: WorkerConfig::default(),
            shutdown,
        }
    }

    /// Create with custom configuration.
    pub fn with_config(
        store: JobStore,
        settings: Settings,
        heartbeat: Box<dyn LivenessSink>,
        shutdown: CancellationToken,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            settings,
            heartbeat,
            config,
            shutdown,
        }
    }

    /// Run the worker until cancellation is observed.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "worker starting"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.heartbeat.beat();

            let job = match self.store.claim_next().await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "failed to claim job");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

            let Some(job) = job else {
                // No runnable jobs; idle until the next poll.
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            self.process(job).await;

            // Re-check after finishing the claimed job so shutdown never
            // abandons one mid-execution.
            if self.shutdown.is_cancelled() {
                break;
            }
        }

        self.heartbeat.clear();
        info!(worker_id = %self.config.worker_id, "worker stopped");
        Ok(())
    }

    /// Execute one claimed job and settle the result. Job-level failures
    /// are recorded, never propagated; only the store can error here.
    async fn process(&self, job: Job) {
        info!(job_id = %job.id, command = %job.command, "executing job");

        let output = match run_command(&job.command).await {
            Ok(output) => output,
            // A launch failure settles exactly like a non-zero exit.
            Err(e) => CommandOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        };

        // Surface job output to the log stream; informational only.
        if !output.stdout.is_empty() {
            info!(job_id = %job.id, "job stdout:\n{}", output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            info!(job_id = %job.id, "job stderr:\n{}", output.stderr.trim_end());
        }

        if output.success() {
            match self.store.mark_completed(&job.id).await {
                Ok(()) => info!(job_id = %job.id, "job completed"),
                Err(e) => error!(job_id = %job.id, error = %e, "failed to mark job completed"),
            }
            return;
        }

        // Re-read tunables on every failure so operator changes apply
        // without restarting workers.
        let policy = RetryPolicy::load(&self.settings).await;
        let error = output.failure_message();

        match self.store.mark_failed(&job, &error, &policy).await {
            Ok(FailureOutcome::Retried {
                attempts,
                delay,
                next_run_at,
            }) => {
                warn!(
                    job_id = %job.id,
                    attempts,
                    delay_secs = delay.as_secs_f64(),
                    next_run_at = %next_run_at,
                    "job failed, retry scheduled"
                );
            }
            Ok(FailureOutcome::Quarantined { attempts }) => {
                warn!(job_id = %job.id, attempts, "job moved to dead letter");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to record job failure");
            }
        }
    }

    /// Run until an interrupt or terminate signal arrives.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            shutdown_signal().await;
            info!("received shutdown signal");
            shutdown.cancel();
        });

        self.run().await
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
