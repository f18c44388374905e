use std::collections::HashMap;

use super::types::{ConnectionHandle, ConnectionId, PeerId};

/// Live connections keyed by peer id, at most one per id.
///
/// Only the gateway's accept and close paths mutate it; routing and peer list
/// pushes only read.
#[derive(Debug, Default)]
pub struct Registry {
    peers: HashMap<PeerId, ConnectionHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `peer_id`, returning the handle it displaced.
    /// The displaced connection is left open.
    pub fn register(&mut self, peer_id: PeerId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.peers.insert(peer_id, handle)
    }

    /// Removes `peer_id` if its live entry belongs to `connection`.
    ///
    /// Returns false for unknown ids and for stale connections that were
    /// replaced by a newer registration under the same id.
    pub fn unregister(&mut self, peer_id: &str, connection: ConnectionId) -> bool {
        match self.peers.get(peer_id) {
            Some(handle) if handle.id() == connection => {
                self.peers.remove(peer_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<&ConnectionHandle> {
        self.peers.get(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &ConnectionHandle)> {
        self.peers.iter()
    }
}
