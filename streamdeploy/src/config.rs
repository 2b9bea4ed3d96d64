//! Engine configuration.
//!
//! Every field has a serde default, so a partial JSON document (or `{}`)
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{DeployError, Result};
use crate::release::{validate_version, ReleasePackager};
use crate::state::{default_pool_size, StatusPoller};

/// Top-level configuration for a [`StreamService`](crate::service::StreamService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrent status queries.
    #[serde(default = "default_pool_size")]
    pub poller_pool_size: usize,
    /// Per-pipeline status query timeout in seconds.
    #[serde(default = "default_status_timeout")]
    pub status_timeout_seconds: f64,
    /// Platform used when `release.platform` is not given.
    #[serde(default = "default_platform")]
    pub default_platform: String,
    /// Repository used when `release.repository` is not given.
    #[serde(default = "default_repository")]
    pub default_repository: String,
    /// Package version used when `release.package.version` is not given.
    #[serde(default = "default_package_version")]
    pub default_package_version: String,
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_status_timeout() -> f64 {
    10.0
}

fn default_platform() -> String {
    "default".to_string()
}

fn default_repository() -> String {
    crate::release::DEFAULT_REPOSITORY.to_string()
}

fn default_package_version() -> String {
    crate::release::DEFAULT_PACKAGE_VERSION.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poller_pool_size: default_pool_size(),
            status_timeout_seconds: default_status_timeout(),
            default_platform: default_platform(),
            default_repository: default_repository(),
            default_package_version: default_package_version(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the poller pool size.
    #[must_use]
    pub fn with_poller_pool_size(mut self, size: usize) -> Self {
        self.poller_pool_size = size;
        self
    }

    /// Sets the status timeout.
    #[must_use]
    pub fn with_status_timeout(mut self, seconds: f64) -> Self {
        self.status_timeout_seconds = seconds;
        self
    }

    /// Sets the default platform.
    #[must_use]
    pub fn with_default_platform(mut self, platform: impl Into<String>) -> Self {
        self.default_platform = platform.into();
        self
    }

    /// Sets the default repository.
    #[must_use]
    pub fn with_default_repository(mut self, repository: impl Into<String>) -> Self {
        self.default_repository = repository.into();
        self
    }

    /// Sets the default package version.
    #[must_use]
    pub fn with_default_package_version(mut self, version: impl Into<String>) -> Self {
        self.default_package_version = version.into();
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Gets the status timeout as a Duration.
    #[must_use]
    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.status_timeout_seconds)
    }

    /// Checks value ranges and the default package version.
    pub fn validate(&self) -> Result<()> {
        if self.poller_pool_size == 0 {
            return Err(DeployError::Internal("poller_pool_size must be at least 1".to_string()));
        }
        if !self.status_timeout_seconds.is_finite() || self.status_timeout_seconds <= 0.0 {
            return Err(DeployError::Internal(format!(
                "status_timeout_seconds must be positive, got {}",
                self.status_timeout_seconds
            )));
        }
        if self.default_platform.trim().is_empty() {
            return Err(DeployError::Internal("default_platform must not be empty".to_string()));
        }
        validate_version("config", &self.default_package_version)?;
        Ok(())
    }

    /// Builds the status poller described by this configuration.
    #[must_use]
    pub fn poller(&self) -> StatusPoller {
        StatusPoller::new(self.poller_pool_size, self.status_timeout())
    }

    /// Builds the release packager described by this configuration.
    #[must_use]
    pub fn packager(&self) -> ReleasePackager {
        ReleasePackager::new(self.default_package_version.clone(), self.default_repository.clone())
    }
}

/// Logging configuration for [`init_tracing`](crate::observability::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enables JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}
