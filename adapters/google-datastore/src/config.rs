//! Datastore connection settings.
//!
//! Loaded once at startup so misconfiguration fails before the first call.

use std::path::PathBuf;
use std::time::Duration;

use notebook::NotebookError;

const DEFAULT_ENDPOINT: &str = "https://datastore.googleapis.com";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Where and how to reach Cloud Datastore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatastoreConfig {
    pub project_id: String,
    /// Service-account key file. Required unless `emulator_host` is set.
    pub credentials_path: Option<PathBuf>,
    pub namespace: Option<String>,
    /// `host:port` of a local emulator; requests then go over plain HTTP
    /// without credentials.
    pub emulator_host: Option<String>,
    /// Deadline for a single HTTP round trip.
    pub request_timeout: Duration,
}

impl DatastoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            credentials_path: None,
            namespace: None,
            emulator_host: None,
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_credentials(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build from environment variables:
    /// - `DATASTORE_PROJECT_ID` (falls back to `GOOGLE_CLOUD_PROJECT`)
    /// - `GOOGLE_APPLICATION_CREDENTIALS` (required outside the emulator)
    /// - `DATASTORE_NAMESPACE` (optional)
    /// - `DATASTORE_EMULATOR_HOST` (optional)
    /// - `DATASTORE_TIMEOUT_MS` (optional, defaults to 10000)
    pub fn from_env() -> Result<Self, NotebookError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NotebookError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let project_id = var("DATASTORE_PROJECT_ID")
            .or_else(|| var("GOOGLE_CLOUD_PROJECT"))
            .ok_or_else(|| {
                NotebookError::Configuration(
                    "missing DATASTORE_PROJECT_ID (or GOOGLE_CLOUD_PROJECT)".into(),
                )
            })?;

        let request_timeout = match var("DATASTORE_TIMEOUT_MS") {
            Some(raw) => {
                let ms = raw.trim().parse::<u64>().map_err(|e| {
                    NotebookError::Configuration(format!("DATASTORE_TIMEOUT_MS={raw:?}: {e}"))
                })?;
                Duration::from_millis(ms)
            }
            None => Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };

        let cfg = Self {
            project_id,
            credentials_path: var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            namespace: var("DATASTORE_NAMESPACE"),
            emulator_host: var("DATASTORE_EMULATOR_HOST"),
            request_timeout,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), NotebookError> {
        if self.project_id.trim().is_empty() {
            return Err(NotebookError::Configuration("empty project id".into()));
        }
        if self.emulator_host.is_none() && self.credentials_path.is_none() {
            return Err(NotebookError::Configuration(
                "missing GOOGLE_APPLICATION_CREDENTIALS (required unless DATASTORE_EMULATOR_HOST is set)"
                    .into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(NotebookError::Configuration("request timeout must be positive".into()));
        }
        Ok(())
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> String {
        match &self.emulator_host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("http://{}", host.trim_end_matches('/')),
            None => DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn uses_emulator(&self) -> bool {
        self.emulator_host.is_some()
    }
}
