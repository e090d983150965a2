//! In-process loopback relay.
//!
//! Routes JSON envelopes between connections by peer id, the way the public
//! relay does, but over mpsc channels instead of WebSockets. The relay never
//! sees plaintext or keys; it only reads `type`, `to` and the registration.
//!
//! [`Relay`] is the routing state and produces [`RelayAction`]s without doing
//! I/O. [`spawn_relay`] drives it from a tokio task.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use quillwire_core::{
    Environment, PeerId, RelayEnvelope, Registration,
    relay::{INVALID_FORMAT, NOT_REGISTERED, PEER_NOT_CONNECTED, RATE_LIMITED, UNKNOWN_TYPE},
};
use serde_json::Value;
use tokio::sync::mpsc;

/// Default frames a connection may send per rate window.
pub const DEFAULT_MAX_FRAMES_PER_WINDOW: usize = 50;

/// Default rate window.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(10);

/// Default largest frame accepted, in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Frame types clients may send.
const CLIENT_TYPES: [&str; 4] = ["register", "message", "request_identity", "identity_response"];

/// Relay limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Frames accepted per connection within one `rate_window`
    pub max_frames_per_window: usize,
    /// Length of the rate window
    pub rate_window: Duration,
    /// Frames longer than this close the connection
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_frames_per_window: DEFAULT_MAX_FRAMES_PER_WINDOW,
            rate_window: DEFAULT_RATE_WINDOW,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Relay-assigned connection id.
pub type ConnectionId = u64;

/// Side effects requested by [`Relay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Write `frame` to `connection`
    Deliver {
        /// Target connection
        connection: ConnectionId,
        /// JSON frame
        frame: String,
    },
    /// Drop `connection`
    Close {
        /// Target connection
        connection: ConnectionId,
    },
}

#[derive(Debug, Default)]
struct Connection {
    peer_id: Option<PeerId>,
    window_start: Option<u64>,
    frames_in_window: usize,
}

/// Routing state: live connections and the peer id bound to each.
#[derive(Debug, Default)]
pub struct Relay {
    config: RelayConfig,
    connections: HashMap<ConnectionId, Connection>,
    peers: HashMap<PeerId, ConnectionId>,
}

impl Relay {
    /// Create an empty relay.
    pub fn new(config: RelayConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Track a new connection.
    pub fn connect(&mut self, connection: ConnectionId) {
        self.connections.insert(connection, Connection::default());
        tracing::debug!(connection, "connection opened");
    }

    /// Forget a connection and its registration.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        let Some(state) = self.connections.remove(&connection) else {
            return;
        };
        if let Some(peer_id) = state.peer_id {
            if self.peers.get(&peer_id) == Some(&connection) {
                self.peers.remove(&peer_id);
            }
            tracing::info!(%peer_id, connection, "peer disconnected");
        }
    }

    /// Connection currently registered as `peer_id`.
    pub fn connection_of(&self, peer_id: &PeerId) -> Option<ConnectionId> {
        self.peers.get(peer_id).copied()
    }

    /// Number of registered peers.
    pub fn registered_peers(&self) -> usize {
        self.peers.len()
    }

    /// Process one frame from `connection` received at `now_millis`.
    pub fn receive(
        &mut self,
        connection: ConnectionId,
        frame: &str,
        now_millis: u64,
    ) -> Vec<RelayAction> {
        if !self.connections.contains_key(&connection) {
            return Vec::new();
        }

        if frame.len() > self.config.max_frame_bytes {
            tracing::warn!(connection, len = frame.len(), "oversized frame, closing");
            self.disconnect(connection);
            return vec![RelayAction::Close { connection }];
        }

        if !self.admit(connection, now_millis) {
            return vec![reply(connection, RATE_LIMITED)];
        }

        let envelope = match decode(frame) {
            Ok(envelope) => envelope,
            Err(reason) => return vec![reply(connection, reason)],
        };

        match envelope {
            RelayEnvelope::Register(Registration { peer_id }) => {
                self.register(connection, peer_id)
            },
            envelope => self.forward(connection, envelope),
        }
    }

    /// Count the frame against the connection's window.
    fn admit(&mut self, connection: ConnectionId, now_millis: u64) -> bool {
        let window = self.config.rate_window.as_millis() as u64;
        let Some(state) = self.connections.get_mut(&connection) else {
            return false;
        };

        match state.window_start {
            Some(start) if now_millis.saturating_sub(start) < window => {},
            _ => {
                state.window_start = Some(now_millis);
                state.frames_in_window = 0;
            },
        }
        if state.frames_in_window >= self.config.max_frames_per_window {
            tracing::warn!(connection, "rate limit exceeded");
            return false;
        }
        state.frames_in_window += 1;
        true
    }

    fn register(&mut self, connection: ConnectionId, peer_id: PeerId) -> Vec<RelayAction> {
        let mut actions = Vec::new();

        if let Some(previous) = self.peers.insert(peer_id.clone(), connection)
            && previous != connection
        {
            // Newest registration wins; the old socket is dropped
            if self.connections.remove(&previous).is_some() {
                actions.push(RelayAction::Close { connection: previous });
            }
            tracing::info!(%peer_id, previous, connection, "registration replaced");
        }

        let old = self
            .connections
            .get_mut(&connection)
            .and_then(|state| state.peer_id.replace(peer_id.clone()));
        if let Some(old) = old
            && old != peer_id
            && self.peers.get(&old) == Some(&connection)
        {
            self.peers.remove(&old);
        }

        tracing::info!(%peer_id, connection, "peer registered");
        let registered = RelayEnvelope::Registered(Registration { peer_id });
        actions.push(RelayAction::Deliver { connection, frame: registered.to_json() });
        actions
    }

    fn forward(&self, connection: ConnectionId, envelope: RelayEnvelope) -> Vec<RelayAction> {
        let Some(sender) = self.connections.get(&connection).and_then(|c| c.peer_id.clone())
        else {
            return vec![reply(connection, NOT_REGISTERED)];
        };

        let envelope = with_sender(envelope, sender);
        let Some(recipient) = envelope.recipient() else {
            return vec![reply(connection, UNKNOWN_TYPE)];
        };

        match self.peers.get(recipient) {
            Some(&target) => {
                tracing::debug!(to = %recipient, connection, "forwarding envelope");
                vec![RelayAction::Deliver { connection: target, frame: envelope.to_json() }]
            },
            None => vec![reply(connection, PEER_NOT_CONNECTED)],
        }
    }
}

/// Classify a client frame before full decoding, so an unknown `type` is
/// reported distinctly from a broken one.
fn decode(frame: &str) -> Result<RelayEnvelope, &'static str> {
    let value: Value = serde_json::from_str(frame).map_err(|_| INVALID_FORMAT)?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(INVALID_FORMAT);
    };
    if !CLIENT_TYPES.contains(&kind) {
        return Err(UNKNOWN_TYPE);
    }
    serde_json::from_value(value).map_err(|_| INVALID_FORMAT)
}

/// Stamp the registered id as the sender; clients cannot speak for others.
fn with_sender(envelope: RelayEnvelope, sender: PeerId) -> RelayEnvelope {
    match envelope {
        RelayEnvelope::Message(mut message) => {
            message.from = sender;
            RelayEnvelope::Message(message)
        },
        RelayEnvelope::RequestIdentity(mut request) => {
            request.from = sender;
            RelayEnvelope::RequestIdentity(request)
        },
        RelayEnvelope::IdentityResponse(mut response) => {
            response.from = sender;
            RelayEnvelope::IdentityResponse(response)
        },
        other => other,
    }
}

fn reply(connection: ConnectionId, message: &str) -> RelayAction {
    RelayAction::Deliver { connection, frame: RelayEnvelope::error(message).to_json() }
}

enum RelayInput {
    Open { connection: ConnectionId, outbound: mpsc::Sender<String> },
    Frame { connection: ConnectionId, frame: String },
    Closed { connection: ConnectionId },
}

/// Handle to a running relay task.
#[derive(Clone)]
pub struct RelayHandle {
    inbox: mpsc::Sender<RelayInput>,
    next_connection: Arc<AtomicU64>,
}

/// One client's connection to the relay.
pub struct RelayConnection {
    id: ConnectionId,
    inbox: mpsc::Sender<RelayInput>,
    frames: mpsc::Receiver<String>,
}

impl RelayHandle {
    /// Open a new connection.
    pub async fn connect(&self) -> Option<RelayConnection> {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (outbound, frames) = mpsc::channel(32);
        self.inbox.send(RelayInput::Open { connection: id, outbound }).await.ok()?;
        Some(RelayConnection { id, inbox: self.inbox.clone(), frames })
    }
}

impl RelayConnection {
    /// Relay-assigned id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send a JSON frame. Returns `false` if the relay is gone.
    pub async fn send(&self, frame: String) -> bool {
        let input = RelayInput::Frame { connection: self.id, frame };
        self.inbox.send(input).await.is_ok()
    }

    /// Next frame from the relay; `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Close the connection.
    pub async fn close(self) {
        let _ = self.inbox.send(RelayInput::Closed { connection: self.id }).await;
    }
}

/// Spawn a relay task.
///
/// The task runs until every [`RelayHandle`] and [`RelayConnection`] is
/// dropped.
pub fn spawn_relay<E: Environment>(env: E, config: RelayConfig) -> RelayHandle {
    let (inbox, mut inputs) = mpsc::channel::<RelayInput>(64);

    tokio::spawn(async move {
        let mut relay = Relay::new(config);
        let mut outbound: HashMap<ConnectionId, mpsc::Sender<String>> = HashMap::new();

        while let Some(input) = inputs.recv().await {
            let actions = match input {
                RelayInput::Open { connection, outbound: sender } => {
                    relay.connect(connection);
                    outbound.insert(connection, sender);
                    continue;
                },
                RelayInput::Closed { connection } => {
                    relay.disconnect(connection);
                    outbound.remove(&connection);
                    continue;
                },
                RelayInput::Frame { connection, frame } => {
                    relay.receive(connection, &frame, env.wall_clock_millis())
                },
            };

            for action in actions {
                match action {
                    RelayAction::Deliver { connection, frame } => {
                        let Some(sender) = outbound.get(&connection) else {
                            continue;
                        };
                        if sender.send(frame).await.is_err() {
                            relay.disconnect(connection);
                            outbound.remove(&connection);
                        }
                    },
                    RelayAction::Close { connection } => {
                        outbound.remove(&connection);
                    },
                }
            }
        }

        tracing::debug!("relay stopped");
    });

    RelayHandle { inbox, next_connection: Arc::new(AtomicU64::new(1)) }
}
