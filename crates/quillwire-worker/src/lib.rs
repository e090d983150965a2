//! Quillwire worker: the ratchet engine behind an isolated task.
//!
//! The engine holds key material, so it is owned by exactly one tokio task
//! and only reachable through typed [`Command`]s. Every call carries a
//! [`CorrelationId`]; replies are routed back to the caller that issued them.
//!
//! # Components
//!
//! - [`spawn_engine`] / [`EngineHandle`]: the isolated engine and its typed API
//! - [`wire`]: JSON form of the command interface for foreign callers
//! - [`Messenger`]: trust-on-first-use glue between the relay and the engine
//! - [`SystemEnv`]: production environment (OS entropy, tokio timers)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod error;
mod handle;
mod messenger;
mod system_env;
pub mod wire;

pub use command::{Command, CorrelationId, Reply, Request, Response, Status, execute};
pub use error::{CommandError, MessengerError};
pub use handle::{
    DEFAULT_CHANNEL_CAPACITY, EngineHandle, EngineTasks, PendingReply, WorkerConfig, spawn_engine,
};
pub use messenger::{
    DEFAULT_MAX_SEEN_IDS, DEFAULT_MAX_SEND_JITTER, Messenger, MessengerAction, MessengerConfig,
    MessengerEvent, SecurityEvent,
};
pub use system_env::SystemEnv;
