use std::env;
use std::path::PathBuf;

use anyhow::Result;
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the worker PID list and heartbeat files.
    pub data_dir: PathBuf,
    pub database_url: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let data_dir = PathBuf::from(
            env::var("QUEUECTL_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        );

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}", data_dir.join("queue.db").display()));

        Ok(Self {
            data_dir,
            database_url,
        })
    }
}
