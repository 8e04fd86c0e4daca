//! Configuration loading for the memberlink daemon.
//!
//! Configuration is loaded from a TOML file (default: `memberlink.toml`).
//! Every section and field is optional.

use memberlink_core::FailurePolicy;
use memberlink_types::{Principal, Watermark};
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Membership store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Reconciliation schedule and policy.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Membership store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// Connection pool size (default: 5).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a connection waits on a locked database (default: 5).
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

/// Reconciliation schedule and policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Run the periodic task (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between ticks (default: 300).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Deadline for each pass in seconds (default: 120).
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Principal that removals and audit records are attributed to.
    #[serde(default = "default_actor")]
    pub actor: String,
    /// `fail-fast` or `continue-on-error`.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Run the grant pass on each tick (default: true).
    #[serde(default = "default_true")]
    pub grants_enabled: bool,
    /// Run the revoke pass on each tick (default: true).
    #[serde(default = "default_true")]
    pub revocations_enabled: bool,
    /// Watermark for the first grant pass, in epoch milliseconds.
    /// Zero means every existing group membership is considered.
    #[serde(default)]
    pub initial_watermark: i64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("memberlink.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_actor() -> String {
    Principal::SYSTEM.to_string()
}

fn default_log_filter() -> String {
    "memberlink_engine=info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            deadline_secs: default_deadline_secs(),
            actor: default_actor(),
            failure_policy: FailurePolicy::default(),
            grants_enabled: true,
            revocations_enabled: true,
            initial_watermark: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl ReconcileConfig {
    /// The configured actor as a principal.
    pub fn principal(&self) -> Result<Principal, ConfigError> {
        Principal::new(self.actor.as_str()).map_err(|e| ConfigError::Invalid {
            field: "reconcile.actor",
            reason: e.to_string(),
        })
    }

    /// The configured starting watermark.
    pub fn watermark(&self) -> Result<Watermark, ConfigError> {
        Watermark::new(self.initial_watermark).map_err(|e| ConfigError::Invalid {
            field: "reconcile.initial_watermark",
            reason: e.to_string(),
        })
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "database.max_connections",
                reason: "must be at least 1".into(),
            });
        }
        if self.reconcile.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconcile.interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.reconcile.deadline_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reconcile.deadline_secs",
                reason: "must be at least 1".into(),
            });
        }
        self.reconcile.principal()?;
        self.reconcile.watermark()?;
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value parsed but is not usable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
