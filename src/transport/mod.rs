//! Transport Layer
//!
//! WebSocket acceptance and TCP socket configuration for client
//! connections.

mod websocket;


pub use websocket::accept_room;

use tokio::net::TcpStream;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP nodelay
    pub tcp_nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { tcp_nodelay: true }
    }
}

/// Configure a freshly accepted TCP stream
pub fn configure_stream(stream: &TcpStream, config: &TransportConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;
    Ok(())
}
