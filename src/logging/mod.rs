//! Structured logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` built from the
//! configured level, and a text or JSON formatter.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};

/// Logging error types
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {directive:?}: {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("initialization error: {0}")]
    InitError(String),
}

/// Build the filter for `level`, which may be a bare level or a full
/// `EnvFilter` directive such as `pollcast=debug,sqlx=warn`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter {
        directive: level.to_string(),
        message: e.to_string(),
    })
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_filter(&config.level)?;

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    result.map_err(|e| LoggingError::InitError(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}
