//! Quillwire command line.
//!
//! Thin shell over [`quillwire_worker`]: generate identities, expose the
//! engine's JSON command interface on stdio, and run a two-party demo through
//! an in-process relay.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod demo;
pub mod error;
pub mod relay;
pub mod serve;

use quillwire_core::{EngineConfig, Environment, IdentityRecord, RatchetEngine};

pub use demo::{DemoConfig, DemoReport, run_demo};
pub use error::CliError;
pub use relay::{Relay, RelayAction, RelayConfig, RelayHandle, spawn_relay};
pub use serve::serve_commands;

/// Generate a fresh identity record.
pub fn keygen<E: Environment>(env: E) -> Result<IdentityRecord, CliError> {
    let mut engine = RatchetEngine::new(env, EngineConfig::default())?;
    Ok(engine.init_identity(None)?)
}
