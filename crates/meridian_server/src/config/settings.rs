//! Configuration settings structures
//!
//! Defines the configuration tree for the realtime server: network
//! settings, connection limits, delivery tunables and logging options.
//! The whole tree serializes to and from TOML configuration files.

use serde::{Deserialize, Serialize};

/// Root configuration object.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Server-specific settings
    pub server: ServerSettings,
    /// Optional logging configuration
    pub logging: Option<LoggingSettings>,
}

/// Server configuration settings
///
/// Core parameters for the WebSocket listener and per-connection
/// delivery behavior.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerSettings {
    /// Network address to bind the server to
    ///
    /// Format: "IP:PORT" (e.g., "127.0.0.1:8080" for localhost,
    /// "0.0.0.0:8080" for all interfaces)
    pub listen_addr: String,

    /// Maximum number of concurrent connections
    ///
    /// Further connection attempts are refused at accept time until
    /// existing connections close.
    pub max_connections: usize,

    /// Depth of each connection's outbound command queue
    ///
    /// Messages to a connection whose queue is full are dropped and
    /// counted rather than blocking the sender.
    pub outbound_queue_capacity: usize,

    /// Delay in milliseconds before the one-time welcome chat message
    ///
    /// Gives the client UI time to mount before the first chat line
    /// appears.
    pub welcome_delay_ms: u64,
}

/// Logging system configuration
///
/// Controls how the server outputs log messages and diagnostic
/// information.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingSettings {
    /// Logging level filter
    ///
    /// Valid values: "trace", "debug", "info", "warn", "error"
    /// Higher levels include all lower levels.
    pub level: String,

    /// Enable JSON-formatted log output
    ///
    /// When true, logs are output in structured JSON format,
    /// useful for log aggregation systems.
    pub json_format: bool,
}

impl Default for Config {
    /// Create a default configuration suitable for development
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listen_addr: "127.0.0.1:8080".to_string(),
                max_connections: 1000,
                outbound_queue_capacity: 256,
                welcome_delay_ms: 1000,
            },
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            }),
        }
    }
}
