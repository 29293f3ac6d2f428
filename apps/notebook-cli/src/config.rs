//! Centralized configuration for the notebook CLI.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time. Datastore connection
//! settings are read separately by `DatastoreConfig::from_env`.

use std::env;
use std::fmt;

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost when the process exits)
    Memory,
    /// Google Cloud Datastore (or its emulator)
    Datastore,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("memory") {
            Self::Memory
        } else {
            Self::Datastore
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// CLI configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage provider (default: datastore)
    pub storage_provider: StorageProvider,
    /// Log format (default: pretty)
    pub log_format: LogFormat,
    /// Attempts per store call, including the first (default: 3)
    pub retry_attempts: u32,
}

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_provider = StorageProvider::from_str(
            &env::var("STORAGE_PROVIDER").unwrap_or_else(|_| "datastore".into()),
        );

        let log_format =
            LogFormat::from_str(&env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".into()));

        let retry_attempts = match env::var("NOTEBOOK_RETRY_ATTEMPTS") {
            Ok(raw) => parse_attempts(&raw)?,
            Err(_) => 3,
        };

        Ok(Self {
            storage_provider,
            log_format,
            retry_attempts,
        })
    }

    /// Log warnings about configurations that lose data.
    pub fn warn_if_ephemeral(&self) {
        if self.storage_provider == StorageProvider::Memory {
            tracing::warn!(
                "STORAGE_PROVIDER=memory: notes are kept in process memory and discarded on exit."
            );
        }
    }
}

fn parse_attempts(raw: &str) -> Result<u32, ConfigError> {
    let n = raw.trim().parse::<u32>().map_err(|e| ConfigError {
        field: "NOTEBOOK_RETRY_ATTEMPTS",
        message: format!("Invalid value '{}': {}", raw, e),
    })?;
    if n == 0 {
        return Err(ConfigError {
            field: "NOTEBOOK_RETRY_ATTEMPTS",
            message: "Must be at least 1".into(),
        });
    }
    Ok(n)
}
