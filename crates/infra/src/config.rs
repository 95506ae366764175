//! Engine configuration.
//!
//! Loaded with the `config` crate, from `MOTOSHOP_*` environment variables
//! (`MOTOSHOP_DATABASE_URL`, `MOTOSHOP_LOCK_TIMEOUT_MS`, ...) or any other
//! source a caller layers into a [`ConfigBuilder`].

use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "MOTOSHOP";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Postgres connection string; `None` selects the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound on any single row-lock wait.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// `tracing` filter directive handed to `motoshop-observability`.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            lock_timeout_ms: default_lock_timeout_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Load from `MOTOSHOP_*` environment variables, defaulting missing keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder().add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    /// Build and deserialize an arbitrary source stack.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        if config.max_connections == 0 {
            return Err(ConfigError::Message(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
