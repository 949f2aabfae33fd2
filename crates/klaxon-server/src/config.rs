use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use klaxon_ports::types::Backoff;

const DEFAULT_CONFIG_FILE: &str = "klaxon.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    /// Escalation jobs processed at once.
    pub escalation_concurrency: usize,
    pub notification_concurrency: usize,
    pub poll_interval_ms: u64,
    pub escalation_backoff_secs: u64,
    pub notification_backoff_secs: u64,
    /// How long a claimed job stays with its worker. A job still active after
    /// this is handed to the next poll.
    pub job_lease_secs: u64,
    /// Events buffered per broadcast subscriber before it starts lagging.
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "sqlite://klaxon.db?mode=rwc".to_string(),
            escalation_concurrency: 5,
            notification_concurrency: 10,
            poll_interval_ms: 1_000,
            escalation_backoff_secs: 30,
            notification_backoff_secs: 30,
            job_lease_secs: 300,
            event_buffer: 1_024,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file named by `KLAXON_CONFIG` (or
    /// `klaxon.toml`), then `KLAXON_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(config_path()))
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("KLAXON_"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("escalation_concurrency", self.escalation_concurrency as u64),
            ("notification_concurrency", self.notification_concurrency as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("escalation_backoff_secs", self.escalation_backoff_secs),
            ("notification_backoff_secs", self.notification_backoff_secs),
            ("job_lease_secs", self.job_lease_secs),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Validation {
                field: *field,
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "database_url",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_lease_secs as i64)
    }

    pub fn escalation_backoff(&self) -> Backoff {
        Backoff::exponential(self.escalation_backoff_secs)
    }

    pub fn notification_backoff(&self) -> Backoff {
        Backoff::exponential(self.notification_backoff_secs)
    }
}

fn config_path() -> PathBuf {
    std::env::var_os("KLAXON_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
