//! Typed commands accepted by the engine task and their replies.

use quillwire_core::{EncryptedMessage, Environment, IdentityRecord, PeerId, RatchetEngine, Role};
use zeroize::Zeroizing;

use crate::error::CommandError;

/// Correlation token pairing a reply with the call that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

/// Operation requested of the engine.
///
/// Not `Debug`: variants carry plaintext.
pub enum Command {
    /// Import `existing`, or generate a fresh identity
    InitIdentity {
        /// Persisted identity to import
        existing: Option<IdentityRecord>,
    },
    /// Establish the session with a peer
    InitSession {
        /// Remote peer
        peer_id: PeerId,
        /// Peer's SEC1 identity public key
        peer_public_key: Vec<u8>,
        /// Which half of the root material to send on
        role: Role,
    },
    /// Encrypt UTF-8 text for a peer
    Encrypt {
        /// Remote peer
        peer_id: PeerId,
        /// Plaintext, wiped once encrypted
        text: Zeroizing<String>,
    },
    /// Decrypt a message from a peer
    Decrypt {
        /// Remote peer
        peer_id: PeerId,
        /// Message as received
        message: EncryptedMessage,
    },
    /// Wipe every session and the identity
    ClearState,
    /// Wipe one session
    ZeroizeSession {
        /// Remote peer
        peer_id: PeerId,
    },
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitIdentity { .. } => "INIT_IDENTITY",
            Self::InitSession { .. } => "INIT_SESSION",
            Self::Encrypt { .. } => "ENCRYPT",
            Self::Decrypt { .. } => "DECRYPT",
            Self::ClearState => "CLEAR_STATE",
            Self::ZeroizeSession { .. } => "ZEROIZE_SESSION",
        }
    }
}

/// Status-only replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Session established
    Ok,
    /// Every session wiped
    FullWipe,
    /// One session wiped
    Cleared,
}

impl Status {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::FullWipe => "FULL_WIPE",
            Self::Cleared => "CLEARED",
        }
    }
}

/// Successful command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Identity now loaded in the engine
    Identity(IdentityRecord),
    /// Outcome with no payload
    Status(Status),
    /// Encrypted message ready for the relay
    Encrypted(EncryptedMessage),
    /// Decrypted text
    Plaintext(String),
}

/// Command tagged with its correlation token.
pub struct Request {
    /// Token to echo back
    pub id: CorrelationId,
    /// Operation
    pub command: Command,
}

/// Result tagged with the token of the request that produced it.
pub struct Response {
    /// Token from the request
    pub id: CorrelationId,
    /// Outcome
    pub result: Result<Reply, CommandError>,
}

/// Run one command to completion against `engine`.
///
/// Plaintext buffers created here are zeroized before returning.
pub fn execute<E: Environment>(
    engine: &mut RatchetEngine<E>,
    command: Command,
) -> Result<Reply, CommandError> {
    match command {
        Command::InitIdentity { existing } => {
            Ok(Reply::Identity(engine.init_identity(existing.as_ref())?))
        },
        Command::InitSession { peer_id, peer_public_key, role } => {
            engine.init_session(peer_id, &peer_public_key, role)?;
            Ok(Reply::Status(Status::Ok))
        },
        Command::Encrypt { peer_id, text } => {
            Ok(Reply::Encrypted(engine.encrypt(&peer_id, text.as_bytes())?))
        },
        Command::Decrypt { peer_id, message } => {
            let plaintext = Zeroizing::new(engine.decrypt(&peer_id, &message)?);
            Ok(Reply::Plaintext(String::from_utf8_lossy(&plaintext).into_owned()))
        },
        Command::ClearState => {
            engine.clear_all();
            Ok(Reply::Status(Status::FullWipe))
        },
        Command::ZeroizeSession { peer_id } => {
            engine.clear_session(&peer_id);
            Ok(Reply::Status(Status::Cleared))
        },
    }
}
