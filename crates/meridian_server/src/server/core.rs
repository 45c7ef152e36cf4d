//! Accept loop and service lifecycle

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use super::identity::IdentityResolver;
use super::session::run_session;
use crate::connection::{SessionRegistry, DEFAULT_OUTBOX_CAPACITY};
use crate::error::ServerError;
use crate::messaging::MessageRouter;

/// Tunables for a [`RealtimeServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: SocketAddr,
    /// Connections beyond this count are refused at accept time
    pub max_connections: usize,
    /// Depth of each connection's outbound command queue
    pub outbound_queue_capacity: usize,
    /// Delay before the one-time welcome chat line
    pub welcome_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".parse().unwrap(),
            max_connections: 1000,
            outbound_queue_capacity: DEFAULT_OUTBOX_CAPACITY,
            welcome_delay: Duration::from_millis(1000),
        }
    }
}

/// The realtime connection service.
///
/// Owns the registry, the router and the accept loop. Game-layer code
/// keeps a [`SessionRegistry`] handle from [`RealtimeServer::registry`]
/// and pushes its own payloads through it; everything protocol-level
/// happens inside.
pub struct RealtimeServer {
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter>,
    resolver: Arc<dyn IdentityResolver>,
    config: ServerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl RealtimeServer {
    pub fn new(config: ServerConfig, resolver: Arc<dyn IdentityResolver>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.outbound_queue_capacity));
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            router,
            resolver,
            config,
            shutdown_tx,
        }
    }

    /// Registry handle for embedding code that sends or broadcasts its
    /// own payloads.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Binds the configured address and runs the accept loop until
    /// shutdown is signalled.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                ServerError::Network(format!(
                    "Failed to bind to {}: {}",
                    self.config.listen_addr, e
                ))
            })?;
        self.run_with_listener(listener).await
    }

    /// Accept loop over an already-bound listener. Useful when the
    /// embedding application picks the port itself.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Listener has no local address: {}", e)))?;
        info!("🚀 Listening on {}", local_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if self.registry.connection_count() >= self.config.max_connections {
                                warn!(
                                    "⚠️ Connection limit reached ({}), refusing {}",
                                    self.config.max_connections, peer_addr
                                );
                                continue;
                            }
                            tokio::spawn(run_session(
                                stream,
                                peer_addr,
                                Arc::clone(&self.registry),
                                Arc::clone(&self.router),
                                Arc::clone(&self.resolver),
                                self.config.welcome_delay,
                            ));
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Accept loop stopping");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Stops the accept loop and closes every live connection with a
    /// normal-closure frame.
    pub fn shutdown(&self) {
        info!("🛑 Shutting down realtime server");
        let _ = self.shutdown_tx.send(true);
        self.registry.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::identity::AnonymousIdentity;

    #[test]
    fn default_config_matches_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.outbound_queue_capacity, DEFAULT_OUTBOX_CAPACITY);
        assert_eq!(config.welcome_delay, Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn new_server_starts_empty() {
        let server = RealtimeServer::new(ServerConfig::default(), Arc::new(AnonymousIdentity));
        assert_eq!(server.connection_count(), 0);
        assert!(server.registry().connected_users().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_the_accept_loop() {
        let server = Arc::new(RealtimeServer::new(
            ServerConfig::default(),
            Arc::new(AnonymousIdentity),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move { runner.run_with_listener(listener).await });

        // let the loop subscribe before signalling
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("accept loop should stop")
            .expect("task should not panic");
        assert!(result.is_ok());
    }
}
