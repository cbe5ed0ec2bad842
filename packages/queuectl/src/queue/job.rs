//! Job model for queued shell commands.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job status '{0}' (expected pending|processing|completed|failed)")]
pub struct UnknownStatus(String);

/// A unit of work: one shell command under a caller-chosen unique id.
#[derive(FromRow, Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub status: JobStatus,
    /// Execution attempts made so far.
    pub attempts: i64,
    /// Per-job retry ceiling; when unset the policy's global default applies.
    pub max_retries: Option<i64>,
    pub last_error: Option<String>,
    /// When set, the job is not runnable until this instant passes.
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job is eligible for claiming right now.
    pub fn is_runnable(&self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }

        match self.next_run_at {
            None => true,
            Some(next_run) => next_run <= Utc::now(),
        }
    }

    /// Effective retry ceiling: the per-job override, else the global default.
    pub fn retry_ceiling(&self, global_default: i64) -> i64 {
        self.max_retries.unwrap_or(global_default)
    }
}

/// A quarantined job that exhausted its retry budget.
#[derive(FromRow, Debug, Clone, Serialize)]
pub struct DeadJob {
    pub id: String,
    pub command: String,
    pub last_error: Option<String>,
    pub failed_at: DateTime<Utc>,
}

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_job() -> Job {
        Job {
            id: "job1".to_string(),
            command: "echo test".to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            max_retries: None,
            last_error: None,
            next_run_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pending_job_without_schedule_is_runnable() {
        assert!(sample_job().is_runnable());
    }

    #[test]
    fn processing_job_is_not_runnable() {
        let mut job = sample_job();
        job.status = JobStatus::Processing;
        assert!(!job.is_runnable());
    }

    #[test]
    fn job_scheduled_in_the_future_is_not_runnable() {
        let mut job = sample_job();
        job.next_run_at = Some(Utc::now() + Duration::seconds(100));
        assert!(!job.is_runnable());
    }

    #[test]
    fn job_scheduled_in_the_past_is_runnable() {
        let mut job = sample_job();
        job.next_run_at = Some(Utc::now() - Duration::seconds(1));
        assert!(job.is_runnable());
    }

    #[test]
    fn retry_ceiling_prefers_per_job_override() {
        let mut job = sample_job();
        assert_eq!(job.retry_ceiling(3), 3);
        job.max_retries = Some(5);
        assert_eq!(job.retry_ceiling(3), 5);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("dead".parse::<JobStatus>().is_err());
    }
}
