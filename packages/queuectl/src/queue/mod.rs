//! Queue coordination core.
//!
//! This module provides the job state machine and everything that moves it:
//! - [`JobStore`] - SQLite-backed job and dead-letter tables
//! - [`RetryPolicy`] - retry-with-backoff decisions after a failed run
//! - [`Worker`] - poll / claim / execute / settle loop
//! - [`WorkerSupervisor`] - spawns and stops worker processes
//!
//! # Architecture
//!
//! ```text
//! WorkerSupervisor (spawns N processes)
//!     │
//!     └─► Worker loop (one per process)
//!             ├─► heartbeat (LivenessSink)
//!             ├─► JobStore.claim_next()       pending → processing (CAS)
//!             ├─► executor::run_command()
//!             └─► settle:
//!                     exit 0 → completed
//!                     else   → RetryPolicy → pending + backoff, or dead_jobs
//! ```
//!
//! Worker processes coordinate only through the shared store; the conditional
//! claim transition is the sole synchronization primitive.

mod job;
mod retry;
mod store;
mod supervisor;
mod worker;

pub use job::{DeadJob, Job, JobStatus, QueueSummary, UnknownStatus};
pub use retry::{Disposition, RetryPolicy};
pub use store::{connect, connect_in_memory, EnqueueOutcome, FailureOutcome, JobStore, StoreError};
pub use supervisor::{StopOutcome, WorkerSupervisor};
pub use worker::{FileHeartbeat, LivenessSink, Worker, WorkerConfig};
