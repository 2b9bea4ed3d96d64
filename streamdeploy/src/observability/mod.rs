//! Tracing subscriber setup.
//!
//! The engine itself only emits `tracing` events and spans; embedding
//! binaries call [`init_tracing`] once at startup to route them somewhere.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::errors::{DeployError, Result};

/// Builds the filter: `RUST_LOG` when set, else `config.filter`.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter)
        .map_err(|e| DeployError::Internal(format!("invalid log filter '{}': {e}", config.filter)))
}

/// Installs the global subscriber.
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| DeployError::Internal(format!("tracing already initialized: {e}")))
}
