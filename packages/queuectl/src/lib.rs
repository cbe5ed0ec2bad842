// queuectl - persistence-backed shell job queue
//
// Clients enqueue shell commands under caller-chosen ids; a pool of worker
// processes competes for runnable jobs through an atomic claim on the shared
// SQLite store, executes them, and records outcomes with retry-with-backoff
// and dead-letter quarantine.

pub mod config;
pub mod executor;
pub mod queue;
pub mod settings;

pub use config::Config;
