//! RTMP relay listener
//!
//! Handles TCP accept loop and spawns connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::error::Result;
use crate::registry::StreamRegistry;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;

/// RTMP relay server
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(StreamRegistry::with_config(config.registry.clone()));
        Self::with_registry(config, registry)
    }

    /// Create a server around an existing registry
    pub fn with_registry(config: ServerConfig, registry: Arc<StreamRegistry>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            registry,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown_tx,
        }
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// On shutdown every connection is told to close and the registry ends
    /// all live sessions.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "RTMP relay listening");

        // Spawn cleanup task for stream registry
        let cleanup_handle = self.registry.spawn_cleanup_task();

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.accept_loop(&listener) => {}
        }

        cleanup_handle.abort();
        self.shutdown();
        self.registry.shutdown().await;
        Ok(())
    }

    /// Tell every open connection to close
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit; the permit lives as long as the task
        let permit: Option<OwnedSemaphorePermit> = match &self.connection_semaphore {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(session_id = session_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let mut connection =
                Connection::new(session_id, socket, peer_addr, config, registry, shutdown);

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }
}
