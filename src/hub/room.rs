//! Room membership

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::ClientId;

/// A named set of currently-registered clients.
///
/// Purely passive: only the hub's command loop ever touches a room, so it
/// carries no locking of its own.
#[derive(Debug, Default)]
pub struct Room {
    members: HashMap<ClientId, mpsc::Sender<Bytes>>,
}

impl Room {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    /// Add a member's outbound queue
    pub fn add(&mut self, id: ClientId, sender: mpsc::Sender<Bytes>) {
        self.members.insert(id, sender);
    }

    /// Remove a member, dropping its outbound queue. Returns whether the
    /// member was present.
    pub fn remove(&mut self, id: ClientId) -> bool {
        self.members.remove(&id).is_some()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.members.contains_key(&id)
    }

    /// Iterate current members and their outbound queues
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &mpsc::Sender<Bytes>)> {
        self.members.iter().map(|(id, sender)| (*id, sender))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
