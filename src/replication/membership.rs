use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use super::types::PeerId;

/// Set of peers that announced themselves with a presence beacon.
///
/// Membership only grows: there is no expiry and no removal.
#[derive(Debug, Default)]
pub struct Membership {
    peers: Mutex<BTreeSet<PeerId>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, BTreeSet<PeerId>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a peer. Returns true the first time the peer is seen.
    pub fn on_presence(&self, peer_id: &str) -> bool {
        let mut peers = self.peers();
        let added = peers.insert(peer_id.to_string());
        if added {
            tracing::info!("Peer connected: {} | total peers = {}", peer_id, peers.len());
        }
        added
    }

    /// Copy of the current set, used to fix a round's quorum denominator
    pub fn snapshot(&self) -> BTreeSet<PeerId> {
        self.peers().clone()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers().contains(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_is_idempotent() {
        let membership = Membership::new();
        assert!(membership.on_presence("peer-1"));
        assert!(!membership.on_presence("peer-1"));
        assert!(membership.on_presence("peer-2"));
        assert_eq!(membership.len(), 2);
        assert!(membership.contains("peer-2"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let membership = Membership::new();
        membership.on_presence("peer-1");
        let snapshot = membership.snapshot();

        membership.on_presence("peer-2");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(membership.len(), 2);
    }
}
