//! Configuration
//!
//! Loads a JSON5 file, then applies environment overrides:
//!
//! - `POLLCAST_CONFIG` -- config file path
//! - `PORT` -- listener port
//! - `POLLCAST_BIND` -- listener address
//! - `DATABASE_URL` -- store URL (`memory` or a SQLite URL)
//! - `POLLCAST_LOG` -- log filter directive

pub mod types;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub use types::{BroadcastConfig, Config, LogFormat, LoggingConfig, ServerConfig, StoreConfig};

const CONFIG_FILE_NAME: &str = "pollcast.json5";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: json5::Error },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Resolve the config file path: `$POLLCAST_CONFIG`, else
/// `<config dir>/pollcast/pollcast.json5`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("POLLCAST_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("pollcast").join(CONFIG_FILE_NAME))
}

/// Load configuration from the default location and the process environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_from(config_path().as_deref(), |key| std::env::var(key).ok())
}

/// Load from `path` (a missing file means defaults) and apply overrides read
/// through `env`.
pub fn load_from(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => read_file(path)?,
        Some(path) => {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, env)?;
    validate(&config)?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    json5::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(
    config: &mut Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(port) = env("PORT") {
        config.server.port = port.trim().parse().map_err(|e| ConfigError::Invalid {
            key: "PORT",
            message: format!("{port:?}: {e}"),
        })?;
    }
    if let Some(bind) = env("POLLCAST_BIND") {
        config.server.bind = bind;
    }
    if let Some(url) = env("DATABASE_URL") {
        config.store.url = url;
    }
    if let Some(level) = env("POLLCAST_LOG") {
        config.logging.level = level;
    }
    Ok(())
}

/// Reject values the server cannot start with.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::Invalid {
            key: "server.port",
            message: "must be non-zero".to_string(),
        });
    }
    if !config.server.ws_path.starts_with('/') {
        return Err(ConfigError::Invalid {
            key: "server.wsPath",
            message: format!("{:?} must start with '/'", config.server.ws_path),
        });
    }
    if let Some(message) = ws_path_conflict(&config.server.ws_path) {
        return Err(ConfigError::Invalid {
            key: "server.wsPath",
            message,
        });
    }
    if config.broadcast.queue_size == 0 {
        return Err(ConfigError::Invalid {
            key: "broadcast.queueSize",
            message: "must be at least 1".to_string(),
        });
    }
    if config.store.url.trim().is_empty() {
        return Err(ConfigError::Invalid {
            key: "store.url",
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Why `path` cannot be mounted as the observer endpoint, if it cannot.
fn ws_path_conflict(path: &str) -> Option<String> {
    if path.contains(['{', '}']) {
        return Some(format!("{path:?} must not contain path parameters"));
    }
    if path.split('/').any(|segment| segment.starts_with([':', '*'])) {
        return Some(format!("{path:?} must not contain wildcard segments"));
    }
    if crate::server::API_PATHS.contains(&path) {
        return Some(format!("{path:?} is already an API route"));
    }
    None
}
