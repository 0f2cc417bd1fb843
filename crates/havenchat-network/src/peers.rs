//! Registry of directly reachable peers.
//!
//! The send path prefers a direct delivery when the recipient has a
//! known peer entry and is either marked online or the message is a
//! ping (liveness probe). Online state is bookkeeping owned by the
//! send path: set on a successful direct send, cleared when one
//! fails. Hosts seed entries from their own peer exchange.

use std::collections::HashMap;
use std::sync::Mutex;

use havenchat_types::{HavenchatError, PeerInfo, Result};

/// Thread-safe peer table keyed by hex public key.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, PeerInfo>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a peer entry.
    pub fn insert(&self, public_key: impl Into<String>, peer: PeerInfo) -> Result<()> {
        self.lock()?.insert(public_key.into(), peer);
        Ok(())
    }

    /// Returns the peer entry for a public key, if any.
    pub fn peer(&self, public_key: &str) -> Option<PeerInfo> {
        self.peers
            .lock()
            .ok()
            .and_then(|peers| peers.get(public_key).cloned())
    }

    /// Marks a peer online after a successful direct delivery.
    pub fn mark_online(&self, public_key: &str) -> Result<()> {
        self.set_online(public_key, true)
    }

    /// Marks a peer offline after a failed direct delivery.
    pub fn mark_offline(&self, public_key: &str) -> Result<()> {
        self.set_online(public_key, false)
    }

    fn set_online(&self, public_key: &str, online: bool) -> Result<()> {
        if let Some(peer) = self.lock()?.get_mut(public_key) {
            peer.is_online = online;
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PeerInfo>>> {
        self.peers
            .lock()
            .map_err(|_| HavenchatError::generic("peer registry lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let registry = PeerRegistry::new();
        assert!(registry.peer("05aa").is_none());

        registry
            .insert("05aa", PeerInfo::new("https://10.0.0.2", 8080))
            .expect("insert");
        let peer = registry.peer("05aa").expect("present");
        assert_eq!(peer.port, 8080);
        assert!(!peer.is_online);
    }

    #[test]
    fn online_state_transitions() {
        let registry = PeerRegistry::new();
        registry
            .insert("05aa", PeerInfo::new("https://10.0.0.2", 8080))
            .expect("insert");

        registry.mark_online("05aa").expect("online");
        assert!(registry.peer("05aa").expect("present").is_online);

        registry.mark_offline("05aa").expect("offline");
        assert!(!registry.peer("05aa").expect("present").is_online);
    }

    #[test]
    fn marking_unknown_peer_is_noop() {
        let registry = PeerRegistry::new();
        assert!(registry.mark_online("05ff").is_ok());
        assert!(registry.peer("05ff").is_none());
    }
}
