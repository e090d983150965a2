//! Session store keyed by peer.
//!
//! Holds at most one [`RatchetSession`] per peer. A cleared session is simply
//! absent, which makes it indistinguishable from one that was never
//! established.

use std::collections::HashMap;

use crate::{error::EngineError, peer::PeerId, session::RatchetSession};

/// Lifecycle of a peer's session as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never established, or cleared since
    Uninitialized,
    /// Chains derived and usable
    Established,
}

/// Owns every live ratchet session.
///
/// # Invariants
///
/// - At most one session per peer
/// - Removed or replaced sessions are dropped immediately, zeroizing their
///   chain keys and cached message keys
#[derive(Default)]
pub struct SessionStore {
    sessions: HashMap<PeerId, RatchetSession>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, replacing any existing one for the same peer.
    ///
    /// Returns `true` if a prior session was replaced.
    pub fn insert(&mut self, session: RatchetSession) -> bool {
        let peer_id = session.peer_id().clone();
        self.sessions.insert(peer_id, session).is_some()
    }

    /// Session for `peer_id`.
    pub fn get(&self, peer_id: &PeerId) -> Result<&RatchetSession, EngineError> {
        self.sessions
            .get(peer_id)
            .ok_or_else(|| EngineError::MissingSession { peer_id: peer_id.clone() })
    }

    /// Mutable session for `peer_id`.
    pub fn get_mut(&mut self, peer_id: &PeerId) -> Result<&mut RatchetSession, EngineError> {
        self.sessions
            .get_mut(peer_id)
            .ok_or_else(|| EngineError::MissingSession { peer_id: peer_id.clone() })
    }

    /// Current lifecycle state for `peer_id`.
    pub fn state(&self, peer_id: &PeerId) -> SessionState {
        if self.sessions.contains_key(peer_id) {
            SessionState::Established
        } else {
            SessionState::Uninitialized
        }
    }

    /// Drop the session for `peer_id`. Idempotent.
    ///
    /// Returns `true` if a session existed.
    pub fn remove(&mut self, peer_id: &PeerId) -> bool {
        self.sessions.remove(peer_id).is_some()
    }

    /// Drop every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Peers with a live session, in no particular order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.sessions.keys()
    }
}

#[cfg(test)]
mod tests {
    use quillwire_crypto::{KeyPair, derive_shared_secret};

    use super::*;
    use crate::session::Role;

    fn session(peer: &str, seed: u8) -> RatchetSession {
        let mut next = seed;
        let mut fill = move |buffer: &mut [u8]| {
            for byte in buffer {
                *byte = next;
                next = next.wrapping_add(1);
            }
        };
        let ours = KeyPair::generate(&mut fill).unwrap();
        let theirs = KeyPair::generate(&mut fill).unwrap();
        let secret = derive_shared_secret(ours.private_key(), theirs.public_key());
        RatchetSession::establish(PeerId::from(peer), &secret, Role::Initiator, 16)
    }

    #[test]
    fn missing_peer_is_uninitialized() {
        let store = SessionStore::new();
        let bob = PeerId::from("bob");

        assert_eq!(store.state(&bob), SessionState::Uninitialized);
        assert!(matches!(store.get(&bob), Err(EngineError::MissingSession { .. })));
    }

    #[test]
    fn insert_then_get() {
        let mut store = SessionStore::new();
        assert!(!store.insert(session("bob", 1)));

        let bob = PeerId::from("bob");
        assert_eq!(store.state(&bob), SessionState::Established);
        assert_eq!(store.get(&bob).unwrap().peer_id(), &bob);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reinsert_replaces() {
        let mut store = SessionStore::new();
        store.insert(session("bob", 1));
        store.get_mut(&PeerId::from("bob")).unwrap().encrypt(b"x", 256, |b| b.fill(1)).unwrap();

        assert!(store.insert(session("bob", 1)));
        assert_eq!(store.get(&PeerId::from("bob")).unwrap().count_send(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = SessionStore::new();
        store.insert(session("bob", 1));
        let bob = PeerId::from("bob");

        assert!(store.remove(&bob));
        assert!(!store.remove(&bob));
        assert_eq!(store.state(&bob), SessionState::Uninitialized);
    }

    #[test]
    fn clear_drops_everything() {
        let mut store = SessionStore::new();
        store.insert(session("bob", 1));
        store.insert(session("carol", 50));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.peers().count(), 0);
    }
}
