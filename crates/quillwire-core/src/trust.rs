//! Trust-on-first-use pinning of peer identity keys.
//!
//! The first identity key seen for a peer is pinned. A different key later is
//! reported as a mismatch and never replaces the pin; only an explicit
//! [`TrustStore::forget`] allows re-pinning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;

/// Outcome of presenting an identity key for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// No pin existed; the key is now pinned
    FirstUse,
    /// Key equals the pinned key
    Matches,
    /// Key differs from the pinned key; pin unchanged
    Mismatch,
}

/// Persistable pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedPeer {
    /// Pinned peer
    pub peer_id: PeerId,
    /// SEC1 identity public key
    pub key: Vec<u8>,
}

/// Pinned identity keys by peer.
#[derive(Debug, Default)]
pub struct TrustStore {
    pins: HashMap<PeerId, Vec<u8>>,
}

impl TrustStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore pins from persisted records. Later duplicates are ignored.
    pub fn from_records(records: impl IntoIterator<Item = TrustedPeer>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.pins.entry(record.peer_id).or_insert(record.key);
        }
        store
    }

    /// Present `key` for `peer_id`, pinning it on first use.
    pub fn verify(&mut self, peer_id: &PeerId, key: &[u8]) -> TrustDecision {
        match self.pins.get(peer_id) {
            Some(pinned) if pinned.as_slice() == key => TrustDecision::Matches,
            Some(_) => {
                tracing::warn!(%peer_id, "identity key mismatch");
                TrustDecision::Mismatch
            },
            None => {
                self.pins.insert(peer_id.clone(), key.to_vec());
                tracing::info!(%peer_id, "identity key pinned");
                TrustDecision::FirstUse
            },
        }
    }

    /// Drop the pin for `peer_id` so the next key is accepted as first use.
    pub fn forget(&mut self, peer_id: &PeerId) -> bool {
        self.pins.remove(peer_id).is_some()
    }

    /// Drop every pin.
    pub fn clear(&mut self) {
        self.pins.clear();
    }

    /// Export pins for persistence, ordered by peer id.
    pub fn records(&self) -> Vec<TrustedPeer> {
        let mut records: Vec<_> = self
            .pins
            .iter()
            .map(|(peer_id, key)| TrustedPeer { peer_id: peer_id.clone(), key: key.clone() })
            .collect();
        records.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        records
    }
}
