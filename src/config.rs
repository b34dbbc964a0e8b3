//! Configuration management.
//!
//! Layered loading: compiled defaults, then an optional `relay.toml` in the
//! working directory, then `RELAY_*` environment variables (nested keys use
//! `__`, e.g. `RELAY_DISPATCHER__BATCH_SIZE=10`). No silent fallbacks on
//! malformed values; loading fails loudly instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://relay.db`.
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of concurrent worker loops.
    pub workers: usize,
    /// Maximum jobs claimed per poll.
    pub batch_size: i64,
    pub poll_interval_ms: u64,
    /// Upper bound of the random jitter added to each poll interval.
    pub poll_jitter_ms: u64,
    /// Claims older than this with no terminal transition are reaped.
    pub claim_timeout_ms: u64,
    /// Per-request provider timeout. Must stay below the claim timeout so a
    /// hung call cannot hold a claim past reaping.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_transient_retries: u32,
    pub max_rate_limit_retries: u32,
    pub max_unknown_retries: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            dispatcher: DispatcherConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://relay.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            batch_size: 5,
            poll_interval_ms: 2_000,
            poll_jitter_ms: 250,
            claim_timeout_ms: 120_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_transient_retries: 3,
            max_rate_limit_retries: 3,
            max_unknown_retries: 2,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl RelayConfig {
    /// Load configuration from defaults, `relay.toml` (optional), and
    /// `RELAY_*` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit config file path instead of the default lookup.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let defaults = config::Config::try_from(&RelayConfig::default())
            .map_err(|e| RelayError::Configuration(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);

        builder = match path {
            Some(p) => builder.add_source(config::File::with_name(p)),
            None => builder.add_source(config::File::with_name("relay").required(false)),
        };

        let settings = builder
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;

        let cfg: RelayConfig = settings
            .try_deserialize()
            .map_err(|e| RelayError::Configuration(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.workers == 0 {
            return Err(RelayError::Configuration(
                "dispatcher.workers must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.batch_size <= 0 {
            return Err(RelayError::Configuration(
                "dispatcher.batch_size must be positive".to_string(),
            ));
        }
        if self.dispatcher.request_timeout_ms >= self.dispatcher.claim_timeout_ms {
            return Err(RelayError::Configuration(format!(
                "request_timeout_ms ({}) must be shorter than claim_timeout_ms ({})",
                self.dispatcher.request_timeout_ms, self.dispatcher.claim_timeout_ms
            )));
        }
        Ok(())
    }
}
