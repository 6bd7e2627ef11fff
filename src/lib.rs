//! Roomcast - Room-partitioned WebSocket message relay
//!
//! Bridges transient, per-connection WebSocket channels with a durable
//! broker topic. Clients join named rooms; everything they send is
//! published to the broker, and everything the broker delivers is fanned
//! out to the local members of the matching room. The hub's origin tagging
//! keeps cooperating relay instances from feeding each other's messages
//! back into the broker forever.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod transport;

pub use bridge::{BridgeClient, BridgeError, BridgeStatus, MessagePublisher};
pub use config::Config;
pub use hub::{ClientHandle, ClientId, Hub, HubHandle, MessageOrigin, Room, RoutingEvent};
pub use protocol::{Envelope, EnvelopeError};
pub use server::Server;
