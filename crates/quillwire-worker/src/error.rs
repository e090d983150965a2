//! Errors crossing the command boundary.

use quillwire_core::{EngineError, ErrorClass, PeerId};
use thiserror::Error;

/// Failure of a command as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The engine refused the operation
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Engine task is gone; every later call fails the same way
    #[error("engine stopped")]
    EngineStopped,

    /// No reply within the configured call timeout
    #[error("engine call timed out")]
    Timeout,

    /// JSON request named a command that does not exist
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// JSON request did not have the expected shape
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

impl CommandError {
    /// Classify for reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Engine(err) => err.class(),
            Self::EngineStopped | Self::Timeout => ErrorClass::FatalForCall,
            Self::UnknownCommand(_) | Self::MalformedCommand(_) => ErrorClass::Malformed,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Failure of a [`crate::Messenger`] operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessengerError {
    /// The engine call failed
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Sending is suspended after a security failure with this peer
    #[error("peer {peer_id} is blocked until re-verified")]
    PeerBlocked {
        /// Blocked peer
        peer_id: PeerId,
    },

    /// No session has been established with this peer
    #[error("no session with peer {peer_id}")]
    NoSession {
        /// Remote peer
        peer_id: PeerId,
    },

    /// `start` has not loaded an identity yet
    #[error("messenger not started")]
    NotStarted,
}
