//! Ratchet engine: identity, session establishment and message crypto.
//!
//! The engine owns the identity key pair and the [`SessionStore`]. It is a
//! plain synchronous state machine; isolation and ordering are provided by
//! the worker task that drives it.
//!
//! # Security
//!
//! - The identity private key never leaves the engine except through an
//!   explicit [`IdentityRecord`] export
//! - Shared secrets and root material are zeroized as soon as both chains
//!   are derived
//! - Decrypt failures are reported as a single opaque rejection

use quillwire_crypto::{KeyPair, PublicKey, derive_shared_secret};

use crate::{
    config::EngineConfig,
    env::Environment,
    error::EngineError,
    identity::IdentityRecord,
    message::EncryptedMessage,
    peer::PeerId,
    session::{RatchetSession, Role},
    store::{SessionState, SessionStore},
};

/// Per-process ratchet engine.
pub struct RatchetEngine<E: Environment> {
    env: E,
    config: EngineConfig,
    identity: Option<KeyPair>,
    store: SessionStore,
}

impl<E: Environment> RatchetEngine<E> {
    /// Create an engine with no identity and no sessions.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig`: see [`EngineConfig::validate`]
    pub fn new(env: E, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { env, config, identity: None, store: SessionStore::new() })
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Import `existing`, or generate a fresh identity when `None`.
    ///
    /// Replaces any current identity. Established sessions keep the chains
    /// they were derived with. After [`Self::clear_all`] this must run again
    /// before any session can be established.
    pub fn init_identity(
        &mut self,
        existing: Option<&IdentityRecord>,
    ) -> Result<IdentityRecord, EngineError> {
        let pair = match existing {
            Some(record) => record.to_key_pair().map_err(EngineError::InvalidIdentity)?,
            None => {
                let env = &self.env;
                KeyPair::generate(|buffer| env.random_bytes(buffer))?
            },
        };

        let record = IdentityRecord::from_key_pair(&pair);
        self.identity = Some(pair);

        tracing::info!(imported = existing.is_some(), "identity initialized");
        Ok(record)
    }

    /// SEC1 encoding of the identity public key.
    pub fn identity_public_key(&self) -> Result<Vec<u8>, EngineError> {
        self.identity
            .as_ref()
            .map(|pair| pair.public_key().to_sec1_bytes())
            .ok_or(EngineError::MissingIdentity)
    }

    /// Whether an identity is loaded.
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Establish (or re-establish) the session with `peer_id`.
    ///
    /// Runs ECDH between the identity key and `peer_public_key`, then splits
    /// the root material according to `role`. Any previous session for the
    /// peer is dropped.
    ///
    /// # Errors
    ///
    /// - `MissingIdentity`: no identity loaded
    /// - `InvalidPeerKey`: `peer_public_key` is not a valid SEC1 point
    pub fn init_session(
        &mut self,
        peer_id: PeerId,
        peer_public_key: &[u8],
        role: Role,
    ) -> Result<(), EngineError> {
        let identity = self.identity.as_ref().ok_or(EngineError::MissingIdentity)?;
        let peer_public =
            PublicKey::from_sec1_bytes(peer_public_key).map_err(|_| EngineError::InvalidPeerKey)?;

        let shared_secret = derive_shared_secret(identity.private_key(), &peer_public);
        let session = RatchetSession::establish(
            peer_id.clone(),
            &shared_secret,
            role,
            self.config.max_cached_keys,
        );
        drop(shared_secret);

        let replaced = self.store.insert(session);
        tracing::info!(%peer_id, ?role, replaced, "session established");
        Ok(())
    }

    /// Encrypt `plaintext` for `peer_id`.
    pub fn encrypt(
        &mut self,
        peer_id: &PeerId,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, EngineError> {
        let env = &self.env;
        let session = self.store.get_mut(peer_id)?;
        let message =
            session.encrypt(plaintext, self.config.bucket_size, |buf| env.random_bytes(buf))?;

        tracing::debug!(%peer_id, count = message.header.count, "message encrypted");
        Ok(message)
    }

    /// Decrypt `message` from `peer_id`.
    ///
    /// On any error the session is left unchanged.
    pub fn decrypt(
        &mut self,
        peer_id: &PeerId,
        message: &EncryptedMessage,
    ) -> Result<Vec<u8>, EngineError> {
        let session = self.store.get_mut(peer_id)?;

        match session.decrypt(message, self.config.max_skip) {
            Ok(plaintext) => {
                tracing::debug!(%peer_id, count = message.header.count, "message decrypted");
                Ok(plaintext)
            },
            Err(err) => {
                tracing::warn!(
                    %peer_id,
                    count = message.header.count,
                    reason = ?err.rejection(),
                    "message rejected"
                );
                Err(err)
            },
        }
    }

    /// Lifecycle state of the session with `peer_id`.
    pub fn session_state(&self, peer_id: &PeerId) -> SessionState {
        self.store.state(peer_id)
    }

    /// Read-only view of the session with `peer_id`.
    pub fn session(&self, peer_id: &PeerId) -> Result<&RatchetSession, EngineError> {
        self.store.get(peer_id)
    }

    /// Wipe the session with `peer_id`. Idempotent.
    pub fn clear_session(&mut self, peer_id: &PeerId) {
        if self.store.remove(peer_id) {
            tracing::info!(%peer_id, "session cleared");
        }
    }

    /// Wipe every session and the identity key pair.
    ///
    /// Chains derive only from the two identity keys, so a new
    /// `init_identity` is required before any session can be established.
    pub fn clear_all(&mut self) {
        let count = self.store.len();
        self.store.clear();
        let had_identity = self.identity.take().is_some();
        tracing::warn!(sessions = count, had_identity, "engine state wiped");
    }
}
