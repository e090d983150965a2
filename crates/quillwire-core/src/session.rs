//! Per-peer ratchet session.
//!
//! # Security Properties
//!
//! - Forward Secrecy: every chain step replaces the stored chain key; the old
//!   value is zeroized on drop
//! - Replay Rejection: a counter below `count_recv` is only accepted once, and
//!   only if its key is still cached
//! - Bounded Work: a single message may advance the receive chain by at most
//!   `max_skip` positions
//! - Transactional Receive: a message that fails authentication or unpadding
//!   leaves the session exactly as it was

use std::collections::BTreeMap;

use quillwire_crypto::{
    ChainKey, MessageKey, NONCE_SIZE, ROOT_LABEL, SharedSecret, aead_decrypt, aead_encrypt, hkdf,
    pad, unpad,
};
use zeroize::Zeroizing;

use crate::{
    error::{EngineError, Rejection},
    message::{EncryptedMessage, MessageHeader},
    peer::PeerId,
};

/// Which side of the initial agreement this endpoint took.
///
/// Decides how the 64 bytes of root material are split between the send and
/// receive chains. Both peers must pick opposite roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends on the first half, receives on the second
    Initiator,
    /// Sends on the second half, receives on the first
    Responder,
}

/// Message keys for counters skipped during fast-forward.
///
/// Ordered by counter so overflow can evict the oldest entry.
struct SkippedKeys {
    keys: BTreeMap<u32, MessageKey>,
    capacity: usize,
}

impl SkippedKeys {
    fn new(capacity: usize) -> Self {
        Self { keys: BTreeMap::new(), capacity }
    }

    fn insert(&mut self, peer_id: &PeerId, count: u32, key: MessageKey) {
        if self.capacity == 0 {
            return;
        }
        while self.keys.len() >= self.capacity {
            if let Some((evicted, _)) = self.keys.pop_first() {
                tracing::debug!(%peer_id, evicted, "skipped-key cache full, evicting oldest");
            }
        }
        self.keys.insert(count, key);
    }

    fn take(&mut self, count: u32) -> Option<MessageKey> {
        self.keys.remove(&count)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn contains(&self, count: u32) -> bool {
        self.keys.contains_key(&count)
    }
}

/// Symmetric ratchet state shared with one peer.
///
/// All key material is zeroized when the session is dropped.
///
/// # Invariants
///
/// - `count_send` increases by exactly one per successful encrypt
/// - `count_recv` never decreases and only moves on a freshly derived key
/// - Every cached key has a counter strictly below `count_recv`
pub struct RatchetSession {
    peer_id: PeerId,
    chain_key_send: ChainKey,
    chain_key_recv: ChainKey,
    count_send: u32,
    count_recv: u32,
    skipped: SkippedKeys,
}

impl RatchetSession {
    /// Derive both chains from the agreed secret.
    ///
    /// `HKDF(secret, zero salt, "ROOT")` yields 64 bytes. The initiator sends
    /// on the first half; the responder mirrors. The intermediate material
    /// is zeroized before returning.
    pub fn establish(
        peer_id: PeerId,
        shared_secret: &SharedSecret,
        role: Role,
        max_cached_keys: usize,
    ) -> Self {
        let material = hkdf(shared_secret.as_bytes(), None, ROOT_LABEL);
        let (first, second) = ChainKey::split(&material);

        let (chain_key_send, chain_key_recv) = match role {
            Role::Initiator => (first, second),
            Role::Responder => (second, first),
        };

        Self {
            peer_id,
            chain_key_send,
            chain_key_recv,
            count_send: 0,
            count_recv: 0,
            skipped: SkippedKeys::new(max_cached_keys),
        }
    }

    /// Peer this session talks to.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Number of messages sent so far (the next header count).
    pub fn count_send(&self) -> u32 {
        self.count_send
    }

    /// Next expected incoming counter.
    pub fn count_recv(&self) -> u32 {
        self.count_recv
    }

    /// Number of cached keys for skipped counters.
    pub fn skipped_len(&self) -> usize {
        self.skipped.len()
    }

    /// Whether a key for `count` is waiting in the skip cache.
    pub fn has_skipped(&self, count: u32) -> bool {
        self.skipped.contains(count)
    }

    /// Pad, step the send chain and seal `plaintext`.
    ///
    /// `random` supplies padding filler and the nonce. Padding happens before
    /// the chain steps so a rejected plaintext leaves the session untouched.
    ///
    /// # Errors
    ///
    /// - `CounterExhausted`: `count_send` reached `u32::MAX`
    /// - `PlaintextTooLong`: length does not fit the padding prefix
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        bucket_size: usize,
        mut random: impl FnMut(&mut [u8]),
    ) -> Result<EncryptedMessage, EngineError> {
        if self.count_send == u32::MAX {
            return Err(EngineError::CounterExhausted { peer_id: self.peer_id.clone() });
        }

        let padded = pad(plaintext, bucket_size, |filler| random(filler))?;

        let (message_key, next) = self.chain_key_send.step();
        self.chain_key_send = next;

        let mut iv = [0u8; NONCE_SIZE];
        random(&mut iv);
        let ciphertext = aead_encrypt(&message_key, &iv, &padded);

        let count = self.count_send;
        self.count_send += 1;

        Ok(EncryptedMessage { header: MessageHeader { count }, iv, ciphertext })
    }

    /// Open an incoming message.
    ///
    /// Order of checks: skip cache, replay, skip bound, then fast-forward.
    /// Fast-forward runs on a copy of the receive chain and is committed only
    /// after the message authenticates and unpads.
    ///
    /// # Errors
    ///
    /// - `Rejected(Replay)`: counter already consumed and not cached
    /// - `Rejected(SkipLimit)`: counter more than `max_skip` ahead
    /// - `Rejected(Integrity)`: authentication or padding failure
    pub fn decrypt(
        &mut self,
        message: &EncryptedMessage,
        max_skip: u32,
    ) -> Result<Vec<u8>, EngineError> {
        let count = message.header.count;

        if count < self.count_recv {
            let Some(message_key) = self.skipped.take(count) else {
                return Err(EngineError::Rejected(Rejection::Replay));
            };
            return match open(&message_key, message) {
                Ok(plaintext) => Ok(plaintext),
                Err(err) => {
                    self.skipped.keys.insert(count, message_key);
                    Err(err)
                },
            };
        }

        let skip = count - self.count_recv;
        if skip > max_skip {
            return Err(EngineError::Rejected(Rejection::SkipLimit));
        }
        // count_recv would overflow; no sender can legitimately produce this
        let Some(next_recv) = count.checked_add(1) else {
            return Err(EngineError::Rejected(Rejection::Integrity));
        };

        let mut chain = self.chain_key_recv.clone();
        let mut staged = Vec::with_capacity(skip as usize);
        for skipped_count in self.count_recv..count {
            let (message_key, next) = chain.step();
            staged.push((skipped_count, message_key));
            chain = next;
        }
        let (message_key, next) = chain.step();

        let plaintext = open(&message_key, message)?;

        self.chain_key_recv = next;
        self.count_recv = next_recv;
        for (skipped_count, key) in staged {
            self.skipped.insert(&self.peer_id, skipped_count, key);
        }

        Ok(plaintext)
    }
}

/// Authenticate, decrypt and unpad. The padded buffer is zeroized on drop.
fn open(message_key: &MessageKey, message: &EncryptedMessage) -> Result<Vec<u8>, EngineError> {
    let padded = Zeroizing::new(aead_decrypt(message_key, &message.iv, &message.ciphertext)?);
    Ok(unpad(&padded)?)
}
