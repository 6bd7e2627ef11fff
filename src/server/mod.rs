//! Relay Server
//!
//! Accepts TCP connections, upgrades them to WebSockets, and hands each one
//! to the connection layer. Coordinates shutdown and enforces the
//! connection limit; everything message-related happens in the hub.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{LimitsConfig, ServerConfig};
use crate::connection;
use crate::hub::HubHandle;
use crate::transport::{accept_room, configure_stream, TransportConfig};


/// Reserve a connection slot, failing once `limit` are in flight
fn try_acquire(active: &AtomicUsize, limit: usize) -> bool {
    active
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            (n < limit).then_some(n + 1)
        })
        .is_ok()
}

/// Decrements the active-connection counter when a connection task ends
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The WebSocket relay server
pub struct Server {
    config: ServerConfig,
    limits: LimitsConfig,
    transport: TransportConfig,
    hub: HubHandle,
    /// Shutdown signal
    shutdown: broadcast::Sender<()>,
    /// Active connection count
    active: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(config: ServerConfig, limits: LimitsConfig, hub: HubHandle) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            limits,
            transport: TransportConfig::default(),
            hub,
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run the accept loop
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind).await?;
        info!(
            "relay listening on {} (path: {}/<room_id>)",
            self.config.bind, self.config.ws_path
        );

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("new TCP connection from {}", addr);
                    self.handle_connection(stream, addr);
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Upgrade and serve a new connection on its own task
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if !try_acquire(&self.active, self.config.max_connections) {
            warn!("connection limit reached, dropping connection from {}", addr);
            return;
        }
        let guard = ConnectionGuard(self.active.clone());

        let ws_path = self.config.ws_path.clone();
        let queue_capacity = self.limits.queue_capacity;
        let transport = self.transport.clone();
        let hub = self.hub.clone();
        let shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let _guard = guard;

            if let Err(e) = configure_stream(&stream, &transport) {
                debug!("failed to configure socket for {}: {}", addr, e);
            }

            match accept_room(stream, &ws_path).await {
                Ok((ws, room_id)) => {
                    debug!("WebSocket handshake complete for {} (room {})", addr, room_id);
                    connection::serve(ws, room_id, hub, queue_capacity, shutdown_rx).await;
                }
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                }
            }
        });
    }

    /// Shut the server down
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Number of live client connections
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}
