//! # Navette Configuration System
//!
//! Environment-aware configuration for the conversion workflow. Values come from
//! `config/navette.toml`, an optional `config/navette.<environment>.toml`
//! override and finally `NAVETTE__SECTION__KEY` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use navette_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let policy = manager.config().jobs.retry_policy();
//! println!("conversion jobs retry {} times", policy.max_attempts);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;
use crate::conversion::totals::{FloorPolicy, RecalculationStrategy};
use crate::jobs::RetryPolicy;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/navette.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NavetteConfig {
    /// Database connection and pooling configuration
    pub database: DatabaseConfig,

    /// Package conversion behaviour
    pub conversion: ConversionConfig,

    /// Background job runner settings
    pub jobs: JobsConfig,

    /// Event publishing settings
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; `${DATABASE_URL}` defers to the environment
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: defaults::DATABASE_MAX_CONNECTIONS,
            acquire_timeout_seconds: defaults::DATABASE_ACQUIRE_TIMEOUT_SECONDS,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the connection URL, expanding `${DATABASE_URL}`
    pub fn database_url(&self) -> Option<String> {
        match self.url.as_deref() {
            Some("${DATABASE_URL}") | None => std::env::var("DATABASE_URL").ok(),
            Some(url) if url.is_empty() => None,
            Some(url) => Some(url.to_string()),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// What to do when a recalculated total would go below zero
    pub floor_policy: FloorPolicy,
    /// How totals are kept in sync on item delete/update
    pub recalculation: RecalculationStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_attempts: u32,
    /// Delay before each retry; the last entry repeats if attempts outnumber it
    pub backoff_ms: Vec<u64>,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Settled jobs are forgotten this long after they finish
    pub finished_retention_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff_ms: defaults::BACKOFF_MS.to_vec(),
            worker_count: defaults::WORKER_COUNT,
            queue_capacity: defaults::QUEUE_CAPACITY,
            finished_retention_seconds: defaults::FINISHED_JOB_RETENTION_SECONDS,
        }
    }
}

impl JobsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        )
    }

    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl NavetteConfig {
    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.jobs.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }
        if self.jobs.backoff_ms.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "jobs.backoff_ms",
                "[]",
                "backoff schedule cannot be empty",
            ));
        }
        if self.jobs.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.worker_count",
                "0",
                "at least one worker is required",
            ));
        }
        if self.jobs.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.queue_capacity",
                "0",
                "queue capacity must be positive",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "event channel capacity must be positive",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "connection pool cannot be empty",
            ));
        }
        Ok(())
    }
}
