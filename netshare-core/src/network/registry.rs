//! Set of live peers owned by one hub session.
//!
//! Every mutation and the broadcast snapshot go through the same lock.
//! Connections are closed by callers *after* the lock is released, so no
//! socket work ever happens while the registry is held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::PeerId;
use crate::network::peer::PeerConnection;

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, Arc<PeerConnection>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, peer: Arc<PeerConnection>) {
        self.peers.lock().insert(peer.id(), peer);
    }

    /// Remove a peer, returning it if it was still registered.
    pub(crate) fn remove(&self, id: PeerId) -> Option<Arc<PeerConnection>> {
        self.peers.lock().remove(&id)
    }

    /// Empty the registry and hand every peer back to the caller.
    pub(crate) fn drain(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.lock().drain().map(|(_, peer)| peer).collect()
    }

    /// Point-in-time copy of the registered peers.
    pub fn snapshot(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Registered peer ids in ascending order.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}
