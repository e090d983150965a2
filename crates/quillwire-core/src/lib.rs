//! Quillwire core: per-peer ratchet sessions and wire types.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ RatchetEngine                                 │
//! │  identity: KeyPair                            │
//! │  store:    SessionStore                       │
//! │             └─ PeerId → RatchetSession        │
//! │                  send chain / recv chain      │
//! │                  count_send / count_recv      │
//! │                  skipped keys (bounded)       │
//! └───────────────────────────────────────────────┘
//!          │ EncryptedMessage { header, iv, ciphertext }
//!          ▼
//!   MessageEnvelope (relay JSON)
//! ```
//!
//! The engine is synchronous and single-owner. Callers that need isolation
//! drive it from a dedicated task (see `quillwire-worker`).
//!
//! Randomness comes from an [`Environment`] so tests can replay exact key
//! and nonce sequences from a seed.

#![forbid(unsafe_code)]

pub mod body;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod identity;
pub mod message;
pub mod peer;
pub mod relay;
pub mod session;
pub mod store;
pub mod trust;

pub use body::MessageBody;
pub use config::{DEFAULT_MAX_CACHED_KEYS, DEFAULT_MAX_SKIP, EngineConfig};
pub use engine::RatchetEngine;
pub use env::Environment;
pub use error::{EngineError, ErrorClass, Rejection};
pub use identity::IdentityRecord;
pub use message::{EncryptedMessage, MessageHeader};
pub use peer::PeerId;
pub use relay::{
    DeliveryRules, EncryptedData, ErrorNotice, IdentityRequest, IdentityResponse, MessageEnvelope,
    RelayEnvelope, RelayError, RelayHeader, Registration,
};
pub use session::{RatchetSession, Role};
pub use store::{SessionState, SessionStore};
pub use trust::{TrustDecision, TrustStore, TrustedPeer};
