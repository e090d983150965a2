//! CLI errors.

use std::io;

use quillwire_core::{EngineError, RelayError};
use quillwire_worker::MessengerError;
use thiserror::Error;

/// Errors surfaced by the `quillwire` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// I/O error on stdin or stdout.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Engine setup or identity error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Messenger operation failed.
    #[error("messenger error: {0}")]
    Messenger(#[from] MessengerError),

    /// Relay frame could not be decoded.
    #[error("relay frame error: {0}")]
    Relay(#[from] RelayError),

    /// JSON encoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A command task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The relay closed the connection.
    #[error("relay connection closed")]
    Disconnected,

    /// The relay answered with something the demo did not expect.
    #[error("unexpected relay reply: {0}")]
    Unexpected(String),
}
