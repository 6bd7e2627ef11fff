//! Dispatch Hub
//!
//! The coordination core of the relay. The hub owns the room table and is
//! the only component that mutates membership or decides what happens to a
//! message. Connections, the broker feed, and any server-side send path all
//! funnel their events through one command channel, and the hub processes
//! them strictly one at a time, so rooms need no locks.
//!
//! Every routed message carries an explicit origin tag:
//!
//! - [`MessageOrigin::Local`] (a directly connected client sent it): the
//!   message is published to the broker and **never** fanned out here. Local
//!   delivery happens when the broker feeds it back.
//! - [`MessageOrigin::External`] (the broker delivered it): the message is
//!   fanned out to the matching room and **never** re-published.
//!
//! Exactly one of the two actions happens per event. Collapsing the tag or
//! doing both would amplify every message into an infinite publish loop
//! across cooperating relay instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use crate::protocol::Envelope;

mod room;

#[cfg(test)]
mod tests;

pub use room::Room;

/// Capacity of the hub command channel
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Identifier for a registered client connection
pub type ClientId = u64;

/// Where a routed message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// A directly connected client sent it: publish, never fan out
    Local,
    /// The broker feed delivered it: fan out, never publish
    External,
}

/// A message heading through the hub
#[derive(Debug, Clone)]
pub struct RoutingEvent {
    /// Target room identifier
    pub room_id: String,
    /// Raw message payload
    pub payload: Bytes,
    /// Origin tag driving the publish-vs-fanout decision
    pub origin: MessageOrigin,
}

/// Registration handle for one client connection
#[derive(Debug)]
pub struct ClientHandle {
    /// Hub-assigned identifier
    pub id: ClientId,
    /// Room the client joined
    pub room_id: String,
    /// Bounded outbound queue drained by the client's write pump
    pub sender: mpsc::Sender<Bytes>,
}

/// Events processed by the hub loop
#[derive(Debug)]
enum HubCommand {
    Register(ClientHandle),
    Unregister(ClientId),
    Route(RoutingEvent),
}

/// The dispatch hub. Create with [`Hub::new`], then drive it with
/// [`Hub::run`] on its own task while the returned [`HubHandle`] is handed
/// to producers.
pub struct Hub {
    /// Room table, keyed by room identifier. Created lazily on first
    /// registration, dropped when the last member leaves.
    rooms: HashMap<String, Room>,
    /// Reverse index: which room each live client sits in
    memberships: HashMap<ClientId, String>,
    /// Serialized event stream
    command_rx: mpsc::Receiver<HubCommand>,
    /// Encoded envelopes heading to the publisher worker
    publish_tx: mpsc::Sender<Bytes>,
}

impl Hub {
    /// Create a hub that hands locally-originated messages to the publisher
    /// worker behind `publish_tx`.
    pub fn new(publish_tx: mpsc::Sender<Bytes>) -> (Self, HubHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let hub = Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            command_rx,
            publish_tx,
        };
        let handle = HubHandle {
            command_tx,
            next_client_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, handle)
    }

    /// Run the hub loop until every handle is dropped
    pub async fn run(mut self) {
        debug!("hub loop started");
        while let Some(command) = self.command_rx.recv().await {
            self.handle_command(command);
        }
        debug!("hub loop stopped");
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(client) => self.register(client),
            HubCommand::Unregister(id) => self.unregister(id),
            HubCommand::Route(event) => self.route(event),
        }
    }

    /// Add a client to its room, creating the room on first join.
    ///
    /// Registration is one-shot per connection; a duplicate id is refused so
    /// a client can never end up in two rooms.
    fn register(&mut self, client: ClientHandle) {
        if self.memberships.contains_key(&client.id) {
            warn!(client = client.id, "client already registered, ignoring");
            return;
        }
        let room = self.rooms.entry(client.room_id.clone()).or_default();
        room.add(client.id, client.sender);
        self.memberships.insert(client.id, client.room_id.clone());
        info!(room = %client.room_id, client = client.id, "client joined room");
    }

    /// Remove a client from its room. Idempotent: unknown ids are a no-op.
    ///
    /// Dropping the member's sender closes its outbound queue, which is what
    /// drives the client's write pump to terminate.
    fn unregister(&mut self, id: ClientId) {
        let Some(room_id) = self.memberships.remove(&id) else {
            return;
        };
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.remove(id);
            info!(room = %room_id, client = id, "client left room");
            if room.is_empty() {
                self.rooms.remove(&room_id);
                debug!(room = %room_id, "removed empty room");
            }
        }
    }

    /// Apply the publish-vs-fanout decision for one routing event
    fn route(&mut self, event: RoutingEvent) {
        match event.origin {
            MessageOrigin::Local => self.publish(&event),
            MessageOrigin::External => self.fan_out(&event),
        }
    }

    /// Hand a locally-originated message to the publisher worker. Never
    /// blocks the loop: a saturated publish queue is a transient publish
    /// failure and the event is dropped.
    fn publish(&mut self, event: &RoutingEvent) {
        let envelope = Envelope::new(event.room_id.clone(), &event.payload);
        let encoded = match envelope.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(room = %event.room_id, error = %e, "failed to encode envelope");
                return;
            }
        };
        match self.publish_tx.try_send(encoded) {
            Ok(()) => trace!(room = %event.room_id, "queued message for publish"),
            Err(TrySendError::Full(_)) => {
                warn!(room = %event.room_id, "publish queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(room = %event.room_id, "publisher is gone, dropping message");
            }
        }
    }

    /// Fan a broker-delivered message out to every member of the room.
    ///
    /// A member whose queue is full (or already closed) is evicted on the
    /// spot: losing a slow consumer is preferred over letting it stall the
    /// whole room.
    fn fan_out(&mut self, event: &RoutingEvent) {
        let Some(room) = self.rooms.get(&event.room_id) else {
            // Nobody here is in that room; the message was still delivered
            // to whichever instances do have members.
            trace!(room = %event.room_id, "no local members, dropping fan-out");
            return;
        };

        let mut evicted = Vec::new();
        for (id, sender) in room.iter() {
            match sender.try_send(event.payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(room = %event.room_id, client = id, "outbound queue full, evicting slow client");
                    evicted.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(room = %event.room_id, client = id, "outbound queue closed, evicting client");
                    evicted.push(id);
                }
            }
        }
        for id in evicted {
            self.unregister(id);
        }
    }
}

/// Cloneable front end to the hub.
///
/// All mutation of room state goes through these four methods; there is no
/// other way to touch membership or a client's outbound queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    command_tx: mpsc::Sender<HubCommand>,
    next_client_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Allocate an identifier for a new client connection
    pub fn next_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a client with its room
    pub async fn register(&self, client: ClientHandle) {
        self.send(HubCommand::Register(client)).await;
    }

    /// Unregister a client. Safe to call more than once.
    pub async fn unregister(&self, id: ClientId) {
        self.send(HubCommand::Unregister(id)).await;
    }

    /// Route a message received from a directly connected client
    pub async fn route_local(&self, room_id: impl Into<String>, payload: Bytes) {
        self.send(HubCommand::Route(RoutingEvent {
            room_id: room_id.into(),
            payload,
            origin: MessageOrigin::Local,
        }))
        .await;
    }

    /// Route a message delivered by the broker feed
    pub async fn route_external(&self, room_id: impl Into<String>, payload: Bytes) {
        self.send(HubCommand::Route(RoutingEvent {
            room_id: room_id.into(),
            payload,
            origin: MessageOrigin::External,
        }))
        .await;
    }

    async fn send(&self, command: HubCommand) {
        if self.command_tx.send(command).await.is_err() {
            debug!("hub is gone, dropping command");
        }
    }
}
