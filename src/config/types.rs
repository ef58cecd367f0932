//! Typed configuration structures
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! configuration.

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// HTTP / WebSocket listener
    pub server: ServerConfig,

    /// Persistent store
    pub store: StoreConfig,

    /// Live update fan-out
    pub broadcast: BroadcastConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,

    /// Upgrade path for observer connections
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
            ws_path: "/ws".to_string(),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// `memory`, or a SQLite URL such as `sqlite://pollcast.db`
    pub url: String,

    /// Pool size for SQLite
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://pollcast.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Broadcast configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastConfig {
    /// Frames buffered per observer before it only keeps the latest
    pub queue_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { queue_size: 64 }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Filter directive (error, warn, info, debug, trace, or an EnvFilter string)
    pub level: String,

    /// Log format (json, text)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
