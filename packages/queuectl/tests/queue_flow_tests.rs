//! End-to-end queue flow tests against an in-memory store.

use chrono::{Duration, Utc};
use queuectl_core::queue::{
    connect_in_memory, EnqueueOutcome, FailureOutcome, JobStatus, JobStore, RetryPolicy,
    StoreError,
};

async fn test_store() -> JobStore {
    JobStore::new(connect_in_memory().await.unwrap())
}

fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        backoff_base: 2.0,
        backoff_cap: 3.0,
    }
}

#[tokio::test]
async fn enqueue_and_list() {
    let store = test_store().await;
    store
        .enqueue("job1", "echo test", None, false)
        .await
        .unwrap();

    let jobs = store.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, "job1");
    assert_eq!(jobs[0].status, JobStatus::Pending);
    assert_eq!(jobs[0].attempts, 0);
    assert!(jobs[0].next_run_at.is_none());
}

#[tokio::test]
async fn duplicate_enqueue_without_replace_is_a_conflict() {
    let store = test_store().await;
    store
        .enqueue("job1", "echo one", None, false)
        .await
        .unwrap();

    let err = store
        .enqueue("job1", "echo two", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));

    // The original record is untouched.
    let job = store.find("job1").await.unwrap().unwrap();
    assert_eq!(job.command, "echo one");
}

#[tokio::test]
async fn enqueue_with_replace_yields_a_fresh_record() {
    let store = test_store().await;
    store
        .enqueue("job1", "echo one", Some(5), false)
        .await
        .unwrap();

    // Give the existing record some history first.
    sqlx::query("UPDATE jobs SET attempts = 2, status = 'failed', last_error = 'boom' WHERE id = 'job1'")
        .execute(store.pool())
        .await
        .unwrap();

    let outcome = store.enqueue("job1", "echo two", None, true).await.unwrap();
    assert_eq!(outcome, EnqueueOutcome::Replaced);

    let job = store.find("job1").await.unwrap().unwrap();
    assert_eq!(job.command, "echo two");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_retries, None);
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn list_filters_by_state_across_the_whole_lifecycle() {
    let store = test_store().await;
    for (id, command) in [
        ("j1", "echo A"),
        ("j2", "echo B"),
        ("j3", "echo C"),
        ("j4", "echo D"),
        ("j5", "echo E"),
    ] {
        store.enqueue(id, command, None, false).await.unwrap();
    }

    sqlx::query("UPDATE jobs SET status = 'processing' WHERE id = 'j2'")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE jobs SET status = 'completed' WHERE id = 'j3'")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE jobs SET status = 'failed', last_error = 'temporary' WHERE id = 'j4'")
        .execute(store.pool())
        .await
        .unwrap();
    let j5 = store.find("j5").await.unwrap().unwrap();
    store.quarantine(&j5, Some("gone")).await.unwrap();

    let pending = store.list(Some(JobStatus::Pending)).await.unwrap();
    let processing = store.list(Some(JobStatus::Processing)).await.unwrap();
    let completed = store.list(Some(JobStatus::Completed)).await.unwrap();
    let failed = store.list(Some(JobStatus::Failed)).await.unwrap();
    let dead = store.list_dead().await.unwrap();

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "j1");
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].id, "j2");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, "j3");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "j4");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, "j5");
}

#[tokio::test]
async fn summary_counts_match_filtered_lists() {
    let store = test_store().await;
    for id in ["a", "b", "c"] {
        store.enqueue(id, "echo x", None, false).await.unwrap();
    }
    store.claim_next().await.unwrap().unwrap();

    let summary = store.summarize().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(
        summary.pending,
        store.list(Some(JobStatus::Pending)).await.unwrap().len() as i64
    );
    assert_eq!(
        summary.processing,
        store.list(Some(JobStatus::Processing)).await.unwrap().len() as i64
    );
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn scheduled_job_is_not_claimed_before_next_run_at() {
    let store = test_store().await;
    store.enqueue("jobY", "cmd", None, false).await.unwrap();

    let future = Utc::now() + Duration::seconds(100);
    sqlx::query("UPDATE jobs SET next_run_at = ? WHERE id = 'jobY'")
        .bind(future)
        .execute(store.pool())
        .await
        .unwrap();

    assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn past_next_run_at_makes_a_job_claimable_again() {
    let store = test_store().await;
    store.enqueue("jobY", "cmd", None, false).await.unwrap();

    let past = Utc::now() - Duration::seconds(1);
    sqlx::query("UPDATE jobs SET next_run_at = ? WHERE id = 'jobY'")
        .bind(past)
        .execute(store.pool())
        .await
        .unwrap();

    let claimed = store.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, "jobY");
}

#[tokio::test]
async fn claim_marks_the_job_processing_exactly_once() {
    let store = test_store().await;
    store
        .enqueue("jobZ", "echo hello", None, false)
        .await
        .unwrap();

    let first = store.claim_next().await.unwrap().unwrap();
    assert_eq!(first.id, "jobZ");
    assert_eq!(first.status, JobStatus::Processing);

    assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_yield_a_single_winner() {
    let store = test_store().await;
    store
        .enqueue("jobZ", "echo hello", None, false)
        .await
        .unwrap();

    let other = store.clone();
    let (a, b) = tokio::join!(store.claim_next(), other.claim_next());
    let winners = [a.unwrap(), b.unwrap()]
        .into_iter()
        .flatten()
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn claim_prefers_the_oldest_eligible_job() {
    let store = test_store().await;
    store.enqueue("first", "echo 1", None, false).await.unwrap();
    store.enqueue("second", "echo 2", None, false).await.unwrap();

    let claimed = store.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, "first");
}

#[tokio::test]
async fn successful_settle_clears_error_and_schedule() {
    let store = test_store().await;
    store.enqueue("job1", "echo ok", None, false).await.unwrap();
    let job = store.claim_next().await.unwrap().unwrap();

    store.mark_completed(&job.id).await.unwrap();

    let job = store.find("job1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.last_error.is_none());
    assert!(job.next_run_at.is_none());
}

#[tokio::test]
async fn failed_settle_schedules_a_backoff_retry() {
    let store = test_store().await;
    let policy = test_policy();
    store.enqueue("jobX", "fail_cmd", None, false).await.unwrap();
    let job = store.claim_next().await.unwrap().unwrap();

    let before = Utc::now();
    let outcome = store.mark_failed(&job, "boom", &policy).await.unwrap();

    match outcome {
        FailureOutcome::Retried {
            attempts, delay, ..
        } => {
            assert_eq!(attempts, 1);
            // base 2.0, attempt 1 -> 2.0s
            assert_eq!(delay.as_secs_f64(), 2.0);
        }
        other => panic!("expected a retry, got {other:?}"),
    }

    let job = store.find("jobX").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some("boom"));
    let next_run_at = job.next_run_at.unwrap();
    assert!(next_run_at > before);
    assert!(next_run_at <= before + Duration::seconds(5));
}

#[tokio::test]
async fn second_failure_is_capped_by_the_backoff_ceiling() {
    let store = test_store().await;
    let policy = test_policy();
    store.enqueue("jobX", "fail_cmd", None, false).await.unwrap();

    let job = store.claim_next().await.unwrap().unwrap();
    store.mark_failed(&job, "boom", &policy).await.unwrap();

    // Make the job immediately eligible again and fail it a second time.
    sqlx::query("UPDATE jobs SET next_run_at = NULL WHERE id = 'jobX'")
        .execute(store.pool())
        .await
        .unwrap();
    let job = store.claim_next().await.unwrap().unwrap();
    let outcome = store.mark_failed(&job, "boom again", &policy).await.unwrap();

    match outcome {
        FailureOutcome::Retried {
            attempts, delay, ..
        } => {
            assert_eq!(attempts, 2);
            // base 2.0, attempt 2 -> 4.0s, capped at 3.0s
            assert_eq!(delay.as_secs_f64(), 3.0);
        }
        other => panic!("expected a retry, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_retries_move_the_job_to_the_dead_letter_table() {
    let store = test_store().await;
    let policy = test_policy();
    store
        .enqueue("job3", "invalid_cmd", Some(1), false)
        .await
        .unwrap();
    let job = store.claim_next().await.unwrap().unwrap();

    let outcome = store.mark_failed(&job, "fail", &policy).await.unwrap();
    assert_eq!(outcome, FailureOutcome::Quarantined { attempts: 1 });

    // Atomic as a unit: gone from the active table, present exactly once in
    // the dead-letter table.
    assert!(store.find("job3").await.unwrap().is_none());
    let dead = store.find_dead("job3").await.unwrap().unwrap();
    assert_eq!(dead.command, "invalid_cmd");
    assert_eq!(dead.last_error.as_deref(), Some("fail"));
}

#[tokio::test]
async fn non_positive_max_retries_quarantines_on_first_failure() {
    let store = test_store().await;
    let policy = test_policy();
    store
        .enqueue("job0", "fail_cmd", Some(0), false)
        .await
        .unwrap();
    let job = store.claim_next().await.unwrap().unwrap();

    let outcome = store.mark_failed(&job, "fail", &policy).await.unwrap();
    assert_eq!(outcome, FailureOutcome::Quarantined { attempts: 1 });
    assert!(store.find("job0").await.unwrap().is_none());
}

#[tokio::test]
async fn dead_letter_retry_restores_a_fresh_pending_job() {
    let store = test_store().await;
    store.enqueue("job4", "echo hi", None, false).await.unwrap();
    let job = store.find("job4").await.unwrap().unwrap();
    store.quarantine(&job, Some("fail")).await.unwrap();

    assert!(store.resurrect("job4").await.unwrap());

    let job = store.find("job4").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.last_error.is_none());
    assert!(job.next_run_at.is_none());
    assert!(store.find_dead("job4").await.unwrap().is_none());
}

#[tokio::test]
async fn dead_letter_retry_reports_missing_ids() {
    let store = test_store().await;
    assert!(!store.resurrect("nope").await.unwrap());
}

#[tokio::test]
async fn dead_letter_list_is_most_recent_first() {
    let store = test_store().await;
    for id in ["d1", "d2"] {
        store.enqueue(id, "echo x", None, false).await.unwrap();
        let job = store.find(id).await.unwrap().unwrap();
        store.quarantine(&job, Some("fail")).await.unwrap();
    }

    let dead = store.list_dead().await.unwrap();
    assert_eq!(dead.len(), 2);
    assert!(dead[0].failed_at >= dead[1].failed_at);
}

#[tokio::test]
async fn delete_reports_whether_a_job_existed() {
    let store = test_store().await;
    store.enqueue("job1", "echo x", None, false).await.unwrap();

    assert!(store.delete("job1").await.unwrap());
    assert!(!store.delete("job1").await.unwrap());
    assert!(store.find("job1").await.unwrap().is_none());
}
