//! Client-side glue between the relay and the engine task.
//!
//! [`Messenger`] owns the policy the engine deliberately leaves out: which
//! identity key to trust for a peer, when to establish a session and in which
//! role, and what to do after a security failure.
//!
//! # Trust on first use
//!
//! The first identity key seen for a peer is pinned, whether it arrives in an
//! `identity_response` (we become the initiator) or in the header of the
//! peer's first `message` (we become the responder). A later key that differs
//! blocks the peer and raises [`SecurityEvent::IdentityMismatch`]; nothing is
//! re-pinned until [`Messenger::retrust`] is called explicitly.
//!
//! # Fail closed
//!
//! A message that fails authentication blocks sending to its peer. Replays
//! are reported but do not block, since duplicates are expected on flaky
//! relays.
//!
//! `handle` returns [`MessengerAction`]s for the caller to perform; the
//! messenger itself never touches the network.

use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};

use quillwire_core::{
    DeliveryRules, Environment, IdentityRecord, IdentityRequest, IdentityResponse, MessageBody,
    MessageEnvelope, PeerId, Registration, Rejection, RelayEnvelope, Role, TrustDecision,
    TrustStore, TrustedPeer,
};
use zeroize::Zeroizing;

use crate::{
    error::{CommandError, MessengerError},
    handle::EngineHandle,
};

/// Default upper bound on the random delay before each send.
pub const DEFAULT_MAX_SEND_JITTER: Duration = Duration::from_millis(300);

/// Default number of delivered message ids remembered for deduplication.
pub const DEFAULT_MAX_SEEN_IDS: usize = 10_000;

/// Messenger settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessengerConfig {
    /// Sends wait a random delay in `0..max_send_jitter`; zero disables it
    pub max_send_jitter: Duration,
    /// Delivered ids kept for duplicate detection, oldest forgotten first
    pub max_seen_ids: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self { max_send_jitter: DEFAULT_MAX_SEND_JITTER, max_seen_ids: DEFAULT_MAX_SEEN_IDS }
    }
}

/// Work produced by [`Messenger::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessengerAction {
    /// Send this envelope to the relay
    Send(RelayEnvelope),
    /// Surface this event to the user
    Emit(MessengerEvent),
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessengerEvent {
    /// Relay accepted our registration
    Registered {
        /// Id the relay bound to our connection
        peer_id: PeerId,
    },
    /// New session with a peer
    SessionEstablished {
        /// Remote peer
        peer_id: PeerId,
        /// Our role in the session
        role: Role,
    },
    /// Text message
    Received {
        /// `"{from}-{timestamp}"`
        id: String,
        /// Sender
        from: PeerId,
        /// Message text
        content: String,
        /// Display rules attached by the sender
        rules: Option<DeliveryRules>,
        /// Sender timestamp in milliseconds
        timestamp: u64,
    },
    /// Peer replaced the content of an earlier message
    Edited {
        /// Sender
        from: PeerId,
        /// Id of the edited message
        id: String,
        /// Replacement text
        content: String,
    },
    /// Peer retracted an earlier message
    Deleted {
        /// Sender
        from: PeerId,
        /// Id of the deleted message
        id: String,
    },
    /// Security failure involving a peer
    SecurityAlert(SecurityEvent),
    /// Engine call failed for a reason other than a rejected message
    CommandFailed {
        /// Peer the call concerned
        peer_id: PeerId,
        /// Failure
        error: CommandError,
    },
    /// Error notice from the relay
    RelayError(String),
}

/// Security failures reported to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Peer presented an identity key different from the pinned one
    IdentityMismatch {
        /// Peer now blocked
        peer_id: PeerId,
    },
    /// A message key was already used
    ReplayBlocked {
        /// Claimed sender
        peer_id: PeerId,
    },
    /// A message failed authentication or was out of range
    DecryptFailure {
        /// Peer now blocked
        peer_id: PeerId,
    },
    /// First message from a peer carried no identity key
    MissingIdentityKey {
        /// Claimed sender
        peer_id: PeerId,
    },
}

/// Bounded set of delivered message ids.
struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self { ids: HashSet::new(), order: VecDeque::new(), capacity: capacity.max(1) }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

/// One user's view of the conversation, driven by relay envelopes.
pub struct Messenger<E: Environment> {
    env: E,
    engine: EngineHandle,
    peer_id: PeerId,
    identity_key: Option<Vec<u8>>,
    trust: TrustStore,
    blocked: HashSet<PeerId>,
    established: HashSet<PeerId>,
    seen: SeenIds,
    last_timestamp: u64,
    config: MessengerConfig,
}

impl<E: Environment> Messenger<E> {
    /// Create a messenger for `peer_id` talking to `engine`.
    pub fn new(env: E, engine: EngineHandle, peer_id: PeerId, config: MessengerConfig) -> Self {
        Self {
            env,
            engine,
            peer_id,
            identity_key: None,
            trust: TrustStore::new(),
            blocked: HashSet::new(),
            established: HashSet::new(),
            seen: SeenIds::new(config.max_seen_ids),
            last_timestamp: 0,
            config,
        }
    }

    /// Restore previously pinned identity keys.
    #[must_use]
    pub fn with_trusted_peers(mut self, records: impl IntoIterator<Item = TrustedPeer>) -> Self {
        self.trust = TrustStore::from_records(records);
        self
    }

    /// Our peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Our identity public key, once started.
    pub fn identity_public_key(&self) -> Option<&[u8]> {
        self.identity_key.as_deref()
    }

    /// Load `existing` into the engine, or generate a fresh identity.
    ///
    /// Returns the record to persist.
    pub async fn start(
        &mut self,
        existing: Option<IdentityRecord>,
    ) -> Result<IdentityRecord, MessengerError> {
        let record = self.engine.init_identity(existing).await?;
        self.identity_key = Some(record.public_key.clone());
        tracing::info!(peer_id = %self.peer_id, "identity loaded");
        Ok(record)
    }

    /// Envelope claiming our peer id on the relay connection.
    pub fn register(&self) -> RelayEnvelope {
        RelayEnvelope::Register(Registration { peer_id: self.peer_id.clone() })
    }

    /// Envelope asking `peer_id` for its identity key.
    pub fn request_identity(&self, peer_id: PeerId) -> RelayEnvelope {
        RelayEnvelope::RequestIdentity(IdentityRequest { from: self.peer_id.clone(), to: peer_id })
    }

    /// Whether sending to `peer_id` is suspended.
    pub fn is_blocked(&self, peer_id: &PeerId) -> bool {
        self.blocked.contains(peer_id)
    }

    /// Whether a session with `peer_id` is established.
    pub fn is_established(&self, peer_id: &PeerId) -> bool {
        self.established.contains(peer_id)
    }

    /// Pinned identity keys, for persistence.
    pub fn trusted_peers(&self) -> Vec<TrustedPeer> {
        self.trust.records()
    }

    /// Process one envelope from the relay.
    pub async fn handle(&mut self, envelope: RelayEnvelope) -> Vec<MessengerAction> {
        match envelope {
            RelayEnvelope::Registered(Registration { peer_id }) => {
                vec![MessengerAction::Emit(MessengerEvent::Registered { peer_id })]
            },
            RelayEnvelope::Error(notice) => {
                tracing::warn!(message = %notice.message, "relay error");
                vec![MessengerAction::Emit(MessengerEvent::RelayError(notice.message))]
            },
            RelayEnvelope::RequestIdentity(request) => self.answer_identity_request(request),
            RelayEnvelope::IdentityResponse(response) => {
                self.accept_identity_response(response).await
            },
            RelayEnvelope::Message(message) => self.receive(message).await,
            RelayEnvelope::Register(_) => {
                tracing::debug!("ignoring register envelope from relay");
                Vec::new()
            },
        }
    }

    fn answer_identity_request(&self, request: IdentityRequest) -> Vec<MessengerAction> {
        let Some(public_key) = self.identity_key.clone() else {
            tracing::debug!(from = %request.from, "identity requested before start");
            return Vec::new();
        };

        vec![MessengerAction::Send(RelayEnvelope::IdentityResponse(IdentityResponse {
            from: self.peer_id.clone(),
            to: request.from,
            public_key,
        }))]
    }

    async fn accept_identity_response(
        &mut self,
        response: IdentityResponse,
    ) -> Vec<MessengerAction> {
        let peer_id = response.from;
        if let Some(alert) = self.pin(&peer_id, &response.public_key) {
            return vec![alert];
        }

        match self.establish(&peer_id, response.public_key, Role::Initiator).await {
            Ok(event) => vec![MessengerAction::Emit(event)],
            Err(error) => {
                vec![MessengerAction::Emit(MessengerEvent::CommandFailed { peer_id, error })]
            },
        }
    }

    async fn receive(&mut self, message: MessageEnvelope) -> Vec<MessengerAction> {
        let peer_id = message.from.clone();
        let id = message.message_id();

        if message.to != self.peer_id {
            tracing::debug!(%id, to = %message.to, "dropping message addressed elsewhere");
            return Vec::new();
        }
        if self.seen.contains(&id) {
            tracing::debug!(%id, "dropping duplicate delivery");
            return Vec::new();
        }
        if self.blocked.contains(&peer_id) {
            tracing::debug!(%id, "dropping message from blocked peer");
            return Vec::new();
        }

        let mut actions = Vec::new();
        match &message.header.identity_key {
            Some(key) => {
                if let Some(alert) = self.pin(&peer_id, key) {
                    return vec![alert];
                }
                if !self.established.contains(&peer_id) {
                    match self.establish(&peer_id, key.clone(), Role::Responder).await {
                        Ok(event) => actions.push(MessengerAction::Emit(event)),
                        Err(error) => {
                            actions.push(MessengerAction::Emit(MessengerEvent::CommandFailed {
                                peer_id,
                                error,
                            }));
                            return actions;
                        },
                    }
                }
            },
            None if !self.established.contains(&peer_id) => {
                tracing::warn!(%peer_id, "first message carried no identity key");
                return vec![alert(SecurityEvent::MissingIdentityKey { peer_id })];
            },
            None => {},
        }

        let Ok(encrypted) = message.to_encrypted_message() else {
            self.blocked.insert(peer_id.clone());
            actions.push(alert(SecurityEvent::DecryptFailure { peer_id }));
            return actions;
        };

        match self.engine.decrypt(peer_id.clone(), encrypted).await {
            Ok(text) => {
                let text = Zeroizing::new(text);
                self.seen.insert(id.clone());
                actions.push(MessengerAction::Emit(delivered(
                    id,
                    &message,
                    MessageBody::from_plaintext(text.as_bytes()),
                )));
            },
            Err(CommandError::Engine(err)) if err.rejection() == Some(Rejection::Replay) => {
                actions.push(alert(SecurityEvent::ReplayBlocked { peer_id }));
            },
            Err(CommandError::Engine(err)) if err.rejection().is_some() => {
                tracing::warn!(%peer_id, "blocking peer after rejected message");
                self.blocked.insert(peer_id.clone());
                actions.push(alert(SecurityEvent::DecryptFailure { peer_id }));
            },
            Err(error) => {
                let event = MessengerEvent::CommandFailed { peer_id, error };
                actions.push(MessengerAction::Emit(event));
            },
        }
        actions
    }

    /// Pin or check `key` for `peer_id`; on mismatch block the peer.
    fn pin(&mut self, peer_id: &PeerId, key: &[u8]) -> Option<MessengerAction> {
        match self.trust.verify(peer_id, key) {
            TrustDecision::FirstUse => {
                tracing::info!(%peer_id, "pinned identity key on first use");
                None
            },
            TrustDecision::Matches => None,
            TrustDecision::Mismatch => {
                tracing::warn!(%peer_id, "identity key mismatch, blocking peer");
                self.blocked.insert(peer_id.clone());
                Some(alert(SecurityEvent::IdentityMismatch { peer_id: peer_id.clone() }))
            },
        }
    }

    async fn establish(
        &mut self,
        peer_id: &PeerId,
        public_key: Vec<u8>,
        role: Role,
    ) -> Result<MessengerEvent, CommandError> {
        self.engine.init_session(peer_id.clone(), public_key, role).await?;
        self.established.insert(peer_id.clone());
        tracing::info!(%peer_id, ?role, "session established");
        Ok(MessengerEvent::SessionEstablished { peer_id: peer_id.clone(), role })
    }

    /// Encrypt a text message for `peer_id`.
    pub async fn send_text(
        &mut self,
        peer_id: &PeerId,
        content: impl Into<String>,
        rules: Option<DeliveryRules>,
    ) -> Result<RelayEnvelope, MessengerError> {
        let body = MessageBody::Text { content: content.into() };
        self.send(peer_id, &body, rules).await
    }

    /// Replace the content of message `id` previously sent to `peer_id`.
    pub async fn send_edit(
        &mut self,
        peer_id: &PeerId,
        id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<RelayEnvelope, MessengerError> {
        let body = MessageBody::Edit { id: id.into(), content: content.into() };
        self.send(peer_id, &body, None).await
    }

    /// Retract message `id` previously sent to `peer_id`.
    pub async fn send_delete(
        &mut self,
        peer_id: &PeerId,
        id: impl Into<String>,
    ) -> Result<RelayEnvelope, MessengerError> {
        let body = MessageBody::Delete { id: id.into() };
        self.send(peer_id, &body, None).await
    }

    async fn send(
        &mut self,
        peer_id: &PeerId,
        body: &MessageBody,
        rules: Option<DeliveryRules>,
    ) -> Result<RelayEnvelope, MessengerError> {
        let Some(identity_key) = self.identity_key.clone() else {
            return Err(MessengerError::NotStarted);
        };
        if self.blocked.contains(peer_id) {
            return Err(MessengerError::PeerBlocked { peer_id: peer_id.clone() });
        }
        if !self.established.contains(peer_id) {
            return Err(MessengerError::NoSession { peer_id: peer_id.clone() });
        }

        let jitter = self.jitter();
        if !jitter.is_zero() {
            self.env.sleep(jitter).await;
        }

        let encrypted = self.engine.encrypt(peer_id.clone(), body.to_json()).await?;
        let mut envelope = MessageEnvelope::new(
            self.peer_id.clone(),
            peer_id.clone(),
            encrypted,
            Some(identity_key),
            self.next_timestamp(),
        );
        envelope.rules = rules;
        Ok(RelayEnvelope::Message(envelope))
    }

    fn jitter(&self) -> Duration {
        let max = self.config.max_send_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.env.random_u64() % max)
    }

    /// Strictly increasing, so message ids never collide within a millisecond.
    fn next_timestamp(&mut self) -> u64 {
        let timestamp = self.env.wall_clock_millis().max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;
        timestamp
    }

    /// Forget the pinned key and session for `peer_id` and ask for its key
    /// again.
    ///
    /// The next key received is pinned as on first use.
    pub async fn retrust(&mut self, peer_id: PeerId) -> Result<RelayEnvelope, MessengerError> {
        self.engine.clear_session(peer_id.clone()).await?;
        self.trust.forget(&peer_id);
        self.blocked.remove(&peer_id);
        self.established.remove(&peer_id);
        tracing::info!(%peer_id, "re-verifying peer");
        Ok(self.request_identity(peer_id))
    }

    /// Wipe every session, pin, block and remembered message id, then
    /// start over on a freshly generated identity.
    ///
    /// Returns the new identity record to persist in place of the old one.
    /// Peers that pinned the old key will report a mismatch until they
    /// re-verify.
    pub async fn panic_wipe(&mut self) -> Result<IdentityRecord, MessengerError> {
        self.identity_key = None;
        self.engine.clear_state().await?;
        self.trust.clear();
        self.blocked.clear();
        self.established.clear();
        self.seen.clear();
        tracing::warn!(peer_id = %self.peer_id, "panic wipe");

        self.start(None).await
    }
}

fn alert(event: SecurityEvent) -> MessengerAction {
    MessengerAction::Emit(MessengerEvent::SecurityAlert(event))
}

fn delivered(id: String, message: &MessageEnvelope, body: MessageBody) -> MessengerEvent {
    let from = message.from.clone();
    match body {
        MessageBody::Text { content } => MessengerEvent::Received {
            id,
            from,
            content,
            rules: message.rules,
            timestamp: message.timestamp,
        },
        MessageBody::Edit { id, content } => MessengerEvent::Edited { from, id, content },
        MessageBody::Delete { id } => MessengerEvent::Deleted { from, id },
    }
}
