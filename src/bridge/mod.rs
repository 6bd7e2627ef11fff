//! Broker Bridge
//!
//! Everything that crosses the process boundary to the durable broker lives
//! here: the [`MessagePublisher`] seam the hub publishes through, the TCP
//! client implementing it, and the two worker loops that decouple broker
//! I/O from the hub (`run_publisher` drains the hub's publish queue,
//! `run_feed` turns delivered payloads into external routing events).
//!
//! The broker itself is a collaborator, not part of this crate; the only
//! contract is "publish bytes" and "a feed of delivered bytes".

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::hub::HubHandle;
use crate::protocol::Envelope;

mod client;


pub use client::BridgeClient;

/// Error type for broker bridge operations
#[derive(Debug)]
pub enum BridgeError {
    /// Connection to the broker failed or was lost
    ConnectionLost(String),
    /// Operation timed out
    Timeout,
    /// The bridge has shut down
    Closed,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            BridgeError::Timeout => write!(f, "operation timed out"),
            BridgeError::Closed => write!(f, "bridge is closed"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Status of the bridge connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// Not connected, will attempt to connect
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and operational
    Connected,
    /// Connection failed, backing off before retry
    Backoff,
}

/// The seam between the hub and whatever durably stores messages.
///
/// Mirrors the relay's contract with the broker: hand over an encoded
/// envelope, get back ok or an error. At-most-once from the relay's side.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one encoded envelope to the broker topic
    async fn publish(&self, payload: Bytes) -> Result<(), BridgeError>;
}

/// Drain the hub's publish queue into the broker.
///
/// Failures are logged and the message dropped; a broken broker never stops
/// the worker, and the hub never waits on it.
pub async fn run_publisher(
    publisher: Arc<dyn MessagePublisher>,
    mut publish_rx: mpsc::Receiver<Bytes>,
) {
    debug!("publisher worker started");
    while let Some(payload) = publish_rx.recv().await {
        if let Err(e) = publisher.publish(payload).await {
            warn!(error = %e, "broker publish failed, dropping message");
        }
    }
    debug!("publisher worker stopped");
}

/// Consume the broker feed and forward each delivery as an external routing
/// event. Malformed payloads are reported and skipped, never fatal.
pub async fn run_feed(mut feed_rx: mpsc::Receiver<Bytes>, hub: HubHandle) {
    debug!("feed loop started");
    while let Some(payload) = feed_rx.recv().await {
        match Envelope::decode(&payload) {
            Ok(envelope) => {
                debug!(room = %envelope.room_id, "delivery from broker");
                let message = Bytes::from(envelope.message.into_bytes());
                hub.route_external(envelope.room_id, message).await;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed broker payload");
            }
        }
    }
    debug!("feed loop stopped");
}
