//! SQLite-backed job store.
//!
//! Owns the `jobs` and `dead_jobs` tables and every durable state
//! transition. Worker processes share the database file; the claim
//! transition is a single conditional `UPDATE`, so at most one caller wins a
//! given job. Quarantine and resurrection each run inside one transaction.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

use super::job::{DeadJob, Job, JobStatus, QueueSummary};
use super::retry::{Disposition, RetryPolicy};

const JOB_COLUMNS: &str =
    "id, command, status, attempts, max_retries, last_error, next_run_at, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job '{0}' already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Result of an enqueue: whether an existing record was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    Replaced,
}

/// What happened to a job after a failed execution was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Requeued; eligible again at `next_run_at`.
    Retried {
        attempts: i64,
        delay: Duration,
        next_run_at: DateTime<Utc>,
    },
    /// Moved to the dead-letter table.
    Quarantined { attempts: i64 },
}

/// Open the queue database and apply migrations.
///
/// WAL mode plus a busy timeout lets several worker processes share the
/// file without stepping on each other.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;

    Ok(pool)
}

/// Open an in-memory database, for tests.
pub async fn connect_in_memory() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    // A single connection keeps every caller on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;

    Ok(pool)
}

/// Durable table of jobs plus the dead-letter quarantine.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Add a job to the queue.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the id is taken and
    /// `replace` is false; otherwise any existing record is dropped and a
    /// fresh pending one inserted.
    pub async fn enqueue(
        &self,
        id: &str,
        command: &str,
        max_retries: Option<i64>,
        replace: bool,
    ) -> Result<EnqueueOutcome, StoreError> {
        let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?
            > 0;

        if existing {
            if !replace {
                return Err(StoreError::AlreadyExists(id.to_string()));
            }
            sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, command, status, attempts, max_retries, last_error, next_run_at, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, NULL, NULL, ?, ?)
            "#,
        )
        .bind(id)
        .bind(command)
        .bind(max_retries)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(if existing {
            EnqueueOutcome::Replaced
        } else {
            EnqueueOutcome::Created
        })
    }

    /// Remove an active job. Returns whether one existed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }

    pub async fn find(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// All jobs in creation order, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<Job>, StoreError> {
        let jobs = match status {
            Some(status) => {
                sqlx::query_as::<_, Job>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at ASC"
                ))
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(jobs)
    }

    /// Job counts by status plus the total.
    pub async fn summarize(&self) -> Result<QueueSummary, StoreError> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = QueueSummary::default();
        for (status, count) in rows {
            summary.total += count;
            match status {
                JobStatus::Pending => summary.pending = count,
                JobStatus::Processing => summary.processing = count,
                JobStatus::Completed => summary.completed = count,
                JobStatus::Failed => summary.failed = count,
            }
        }

        Ok(summary)
    }

    /// Atomically claim the next runnable job for this caller.
    ///
    /// Selects the oldest pending job whose `next_run_at` has passed, then
    /// flips it to `processing` only if it is still pending. When the
    /// conditional update touches zero rows another worker won the race and
    /// the call reports no job; the loser's candidate stays pending and is
    /// reselected on a later poll.
    pub async fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        let candidate = sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = 'pending'
              AND (next_run_at IS NULL OR next_run_at <= ?)
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(Utc::now())
        .bind(&candidate.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            self.find(&candidate.id).await
        } else {
            Ok(None)
        }
    }

    /// Record a successful execution: terminal `completed` state.
    pub async fn mark_completed(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', last_error = NULL, next_run_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed execution and apply the retry policy: either requeue
    /// with a backoff delay or quarantine once the retry ceiling is reached.
    pub async fn mark_failed(
        &self,
        job: &Job,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome, StoreError> {
        let attempts = job.attempts + 1;
        let ceiling = job.retry_ceiling(policy.max_retries);

        match policy.disposition(attempts, ceiling) {
            Disposition::Quarantine => {
                self.quarantine(job, Some(error)).await?;
                Ok(FailureOutcome::Quarantined { attempts })
            }
            Disposition::Retry(delay) => {
                let next_run_at =
                    Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);

                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending', attempts = ?, last_error = ?, next_run_at = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(attempts)
                .bind(error)
                .bind(next_run_at)
                .bind(Utc::now())
                .bind(&job.id)
                .execute(&self.pool)
                .await?;

                Ok(FailureOutcome::Retried {
                    attempts,
                    delay,
                    next_run_at,
                })
            }
        }
    }

    /// Move a job to the dead-letter table, deleting the active record in
    /// the same transaction.
    pub async fn quarantine(&self, job: &Job, error: Option<&str>) -> Result<(), StoreError> {
        let last_error = error.or(job.last_error.as_deref());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO dead_jobs (id, command, last_error, failed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(last_error)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(&job.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Dead-letter records, most recent failures first.
    pub async fn list_dead(&self) -> Result<Vec<DeadJob>, StoreError> {
        let dead = sqlx::query_as::<_, DeadJob>(
            "SELECT id, command, last_error, failed_at FROM dead_jobs ORDER BY failed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(dead)
    }

    pub async fn find_dead(&self, id: &str) -> Result<Option<DeadJob>, StoreError> {
        let dead = sqlx::query_as::<_, DeadJob>(
            "SELECT id, command, last_error, failed_at FROM dead_jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dead)
    }

    /// Move a dead-letter record back into the active queue as a fresh
    /// pending job. Returns false when no such record exists.
    pub async fn resurrect(&self, id: &str) -> Result<bool, StoreError> {
        let Some(dead) = self.find_dead(id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, command, status, attempts, max_retries, last_error, next_run_at, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, NULL, NULL, NULL, ?, ?)
            "#,
        )
        .bind(&dead.id)
        .bind(&dead.command)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM dead_jobs WHERE id = ?")
            .bind(&dead.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(true)
    }
}
