//! Retry decisions for failed job executions.
//!
//! After a failed run the policy either reschedules the job with an
//! exponential backoff delay or quarantines it to the dead-letter table once
//! its retry budget is spent. Backoff is deterministic (no jitter): delays
//! are `base ^ attempts` seconds, hard-capped at `backoff_cap`.

use std::time::Duration;

use crate::settings::Settings;

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;
pub const DEFAULT_BACKOFF_CAP: f64 = 3.0;

/// What to do with a job whose execution just failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disposition {
    /// Requeue the job, eligible again after the given delay.
    Retry(Duration),
    /// Retry budget exhausted; move the job to the dead-letter table.
    Quarantine,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Global retry ceiling, used when a job carries no per-job override.
    pub max_retries: i64,
    pub backoff_base: f64,
    pub backoff_cap: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

impl RetryPolicy {
    /// Load the policy from runtime settings, with the stock defaults for
    /// anything unset.
    pub async fn load(settings: &Settings) -> Self {
        Self {
            max_retries: settings.get_int("max_retries", DEFAULT_MAX_RETRIES).await,
            backoff_base: settings
                .get_float("backoff_base", DEFAULT_BACKOFF_BASE)
                .await,
            backoff_cap: settings.get_float("backoff_cap", DEFAULT_BACKOFF_CAP).await,
        }
    }

    /// Backoff delay before the given attempt count may run again.
    pub fn backoff_delay(&self, attempts: i64) -> Duration {
        let exponent = attempts.clamp(0, i32::MAX as i64) as i32;
        let delay = self.backoff_base.powi(exponent).min(self.backoff_cap);
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Decide the fate of a job that now has `attempts` failed executions
    /// against the given retry ceiling.
    pub fn disposition(&self, attempts: i64, ceiling: i64) -> Disposition {
        if attempts >= ceiling {
            Disposition::Quarantine
        } else {
            Disposition::Retry(self.backoff_delay(attempts))
        }
    }
}
