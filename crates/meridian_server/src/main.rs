//! Meridian Realtime Server - Main Entry Point
//!
//! A WebSocket connection and session manager for multiplayer browser games,
//! with origin and identity replacement, chat and presence fan-out, and
//! graceful shutdown handling.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use meridian_server::{
    config::{self, Args, Config},
    logging, shutdown, AnonymousIdentity, RealtimeServer, ServerConfig,
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let startup_start = Instant::now(); // ⏱️ Start measuring startup time

    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration first so logging can honor its settings
    let config = config::load_config(&args)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize logging system
    if let Err(e) = logging::setup_logging_with_format(&args, config.logging.as_ref()) {
        error!("Failed to initialize logging: {}", e);
        return Err(anyhow::anyhow!("Failed to initialize logging: {}", e));
    }

    // Log startup information
    info!("Starting Meridian Realtime Server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config.display());

    // Create server configuration
    let server_config = create_server_config(&config, &args)?;
    log_server_configuration(&server_config);

    // Initialize the realtime server
    let server = RealtimeServer::new(server_config, Arc::new(AnonymousIdentity));

    // Setup shutdown handler
    let shutdown_receiver = shutdown::setup_shutdown_handler().await;

    info!("Startup complete in {:.2?}", startup_start.elapsed());

    // Run the server and wait for shutdown
    tokio::select! {
        result = server.run() => {
            match result {
                Ok(_) => info!("Server stopped normally"),
                Err(e) => {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = shutdown_receiver => {
            let shutdown_start = Instant::now();
            info!("Shutdown signal received");
            server.shutdown();
            info!("Server shutdown completed in {:.2?}", shutdown_start.elapsed());
        }
    }

    Ok(())
}

/// Create server configuration from loaded config and CLI arguments
fn create_server_config(config: &Config, args: &Args) -> Result<ServerConfig> {
    let listen_addr = args
        .listen
        .as_deref()
        .unwrap_or(&config.server.listen_addr)
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse listen address: {}", e))?;

    let max_connections = args
        .max_connections
        .unwrap_or(config.server.max_connections);

    Ok(ServerConfig {
        listen_addr,
        max_connections,
        outbound_queue_capacity: config.server.outbound_queue_capacity,
        welcome_delay: Duration::from_millis(config.server.welcome_delay_ms),
    })
}

/// Log the final server configuration
fn log_server_configuration(config: &ServerConfig) {
    info!("Server configuration:");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max connections: {}", config.max_connections);
    info!("  Outbound queue capacity: {}", config.outbound_queue_capacity);
    info!("  Welcome delay: {:?}", config.welcome_delay);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_server_config() {
        let config = Config::default();
        let args = Args::default();

        let server_config = create_server_config(&config, &args).unwrap();
        assert_eq!(server_config.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.welcome_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_create_server_config_with_overrides() {
        let config = Config::default();
        let args = Args {
            listen: Some("0.0.0.0:9090".to_string()),
            max_connections: Some(500),
            ..Default::default()
        };

        let server_config = create_server_config(&config, &args).unwrap();
        assert_eq!(server_config.listen_addr.to_string(), "0.0.0.0:9090");
        assert_eq!(server_config.max_connections, 500);
    }

    #[test]
    fn test_create_server_config_rejects_bad_address() {
        let config = Config::default();
        let args = Args {
            listen: Some("not-an-address".to_string()),
            ..Default::default()
        };

        assert!(create_server_config(&config, &args).is_err());
    }
}
