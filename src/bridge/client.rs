//! Broker Bridge Client
//!
//! TCP client for the broker, speaking a line-delimited text protocol:
//!
//! - `SUB <topic> <group>` — sent once after connecting, names the topic to
//!   consume and the consumer group to join
//! - `PUB <topic> <payload>` — publish one payload to the topic
//! - `MSG <payload>` — a delivery from the broker to this subscriber
//!
//! Payloads are single-line JSON envelopes, so the framing never splits
//! them. A connection task owns the socket; publishes arrive over a command
//! channel and deliveries leave over the feed channel, so callers never
//! touch broker I/O directly. Lost connections are retried with exponential
//! backoff.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;

use super::{BridgeError, BridgeStatus, MessagePublisher};

/// Capacity of the command channel feeding the connection task
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Commands handled by the connection task
#[derive(Debug)]
enum BridgeCommand {
    /// Publish an encoded envelope to the broker topic
    Publish(Bytes),
    /// Shut the bridge down gracefully
    Shutdown,
}

/// Build the subscription frame sent after connecting
pub(super) fn subscribe_frame(topic: &str, group: &str) -> String {
    format!("SUB {} {}\n", topic, group)
}

/// Build a publish frame. Payloads are UTF-8 JSON and contain no newlines.
pub(super) fn publish_frame(topic: &str, payload: &[u8]) -> String {
    format!("PUB {} {}\n", topic, String::from_utf8_lossy(payload))
}

/// Extract the payload from a delivery frame, if it is one
pub(super) fn parse_delivery(line: &str) -> Option<Bytes> {
    line.strip_prefix("MSG ")
        .map(|payload| Bytes::copy_from_slice(payload.as_bytes()))
}

/// Client half of the broker bridge.
///
/// Created with [`BridgeClient::spawn`], which starts the connection task.
/// The client itself is cheap to share and implements [`MessagePublisher`].
pub struct BridgeClient {
    status: Arc<RwLock<BridgeStatus>>,
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeClient {
    /// Spawn the connection task. Deliveries from the broker are pushed into
    /// `feed_tx` as raw payload bytes.
    pub fn spawn(config: BrokerConfig, feed_tx: mpsc::Sender<Bytes>) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let status = Arc::new(RwLock::new(BridgeStatus::Disconnected));

        let client = Arc::new(Self {
            status: status.clone(),
            command_tx,
        });

        tokio::spawn(Self::connection_loop(config, status, command_rx, feed_tx));

        client
    }

    /// Current connection status
    pub fn status(&self) -> BridgeStatus {
        *self.status.read()
    }

    /// Request a graceful shutdown of the connection task
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(BridgeCommand::Shutdown).await;
    }

    /// Run the connection loop: connect, serve, back off on failure, retry
    async fn connection_loop(
        config: BrokerConfig,
        status: Arc<RwLock<BridgeStatus>>,
        mut command_rx: mpsc::Receiver<BridgeCommand>,
        feed_tx: mpsc::Sender<Bytes>,
    ) {
        let mut retry_interval = config.reconnect_interval;
        let max_retry = config.max_reconnect_interval;
        let mut pending = VecDeque::new();

        loop {
            *status.write() = BridgeStatus::Connecting;
            debug!(address = %config.address, "bridge connecting");

            match Self::connect_and_run(&config, &status, &mut command_rx, &feed_tx, &mut pending)
                .await
            {
                Ok(()) => {
                    info!("bridge disconnected gracefully");
                    *status.write() = BridgeStatus::Disconnected;
                    return;
                }
                Err(e) => {
                    error!(error = %e, "bridge connection failed");
                    *status.write() = BridgeStatus::Backoff;

                    debug!(retry_in = ?retry_interval, "bridge reconnecting after backoff");
                    tokio::time::sleep(retry_interval).await;
                    retry_interval = std::cmp::min(retry_interval * 2, max_retry);
                }
            }

            // Shutdown may have been requested while we were down. Publishes
            // queued during the outage are kept for the next connection.
            loop {
                match command_rx.try_recv() {
                    Ok(BridgeCommand::Publish(payload)) => pending.push_back(payload),
                    Ok(BridgeCommand::Shutdown) | Err(mpsc::error::TryRecvError::Disconnected) => {
                        info!("bridge shutdown requested");
                        *status.write() = BridgeStatus::Disconnected;
                        return;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                }
            }
        }
    }

    /// Connect to the broker, subscribe, flush publishes held over from the
    /// previous connection, then serve commands and deliveries until either
    /// side fails or shutdown is requested.
    async fn connect_and_run(
        config: &BrokerConfig,
        status: &Arc<RwLock<BridgeStatus>>,
        command_rx: &mut mpsc::Receiver<BridgeCommand>,
        feed_tx: &mpsc::Sender<Bytes>,
        pending: &mut VecDeque<Bytes>,
    ) -> Result<(), BridgeError> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| BridgeError::Timeout)?
            .map_err(|e| BridgeError::ConnectionLost(e.to_string()))?;

        debug!(address = %config.address, "bridge TCP connected");

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // Join the consumer group for our topic before anything else
        write_half
            .write_all(subscribe_frame(&config.topic, &config.group).as_bytes())
            .await
            .map_err(|e| BridgeError::ConnectionLost(e.to_string()))?;

        info!(topic = %config.topic, group = %config.group, "bridge subscribed");
        *status.write() = BridgeStatus::Connected;

        // A payload stays queued until its write succeeds, so a failure here
        // retries it on the next connection rather than losing it.
        while let Some(payload) = pending.front() {
            write_half
                .write_all(publish_frame(&config.topic, payload).as_bytes())
                .await
                .map_err(|e| BridgeError::ConnectionLost(e.to_string()))?;
            pending.pop_front();
        }

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(BridgeCommand::Publish(payload)) => {
                            write_half
                                .write_all(publish_frame(&config.topic, &payload).as_bytes())
                                .await
                                .map_err(|e| BridgeError::ConnectionLost(e.to_string()))?;
                        }
                        Some(BridgeCommand::Shutdown) | None => {
                            let _ = write_half.shutdown().await;
                            return Ok(());
                        }
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let Some(payload) = parse_delivery(&line) else {
                                warn!(frame = %line, "ignoring unknown broker frame");
                                continue;
                            };
                            // The feed consumer applies backpressure here;
                            // if it is gone the relay is shutting down.
                            if feed_tx.send(payload).await.is_err() {
                                return Ok(());
                            }
                        }
                        Ok(None) => {
                            return Err(BridgeError::ConnectionLost("broker closed the feed".to_string()));
                        }
                        Err(e) => {
                            return Err(BridgeError::ConnectionLost(e.to_string()));
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessagePublisher for BridgeClient {
    async fn publish(&self, payload: Bytes) -> Result<(), BridgeError> {
        self.command_tx
            .send(BridgeCommand::Publish(payload))
            .await
            .map_err(|_| BridgeError::Closed)
    }
}
