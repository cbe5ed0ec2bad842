//! Database-backed runtime settings.
//!
//! Tunables such as retry limits live in the `config` table so operators can
//! change them without restarting workers. Typed getters coerce the stored
//! string and fall back to the caller's default when the key is absent or
//! the value does not parse.

use sqlx::SqlitePool;
use tracing::warn;

/// Key/value settings store over the shared queue database.
#[derive(Clone)]
pub struct Settings {
    pool: SqlitePool,
}

impl Settings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Set a key, overwriting any previous value.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value)
            VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the raw string value for a key.
    pub async fn get(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    /// Fetch an integer setting, falling back to `default` when the key is
    /// absent or the stored value is malformed.
    pub async fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.get(key).await {
            Ok(Some(value)) => value.trim().parse().unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                warn!(key, error = %e, "failed to read setting, using default");
                default
            }
        }
    }

    /// Fetch a float setting, falling back to `default` when the key is
    /// absent or the stored value is malformed.
    pub async fn get_float(&self, key: &str, default: f64) -> f64 {
        match self.get(key).await {
            Ok(Some(value)) => value.trim().parse().unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                warn!(key, error = %e, "failed to read setting, using default");
                default
            }
        }
    }
}
