//! Relay wire format.
//!
//! JSON envelopes exchanged with the untrusted relay, tagged by `type`. The
//! relay only routes by `to`; everything the engine needs travels inside
//! [`MessageEnvelope`].

use quillwire_crypto::NONCE_SIZE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    message::{EncryptedMessage, MessageHeader},
    peer::PeerId,
};

/// Relay reply when the recipient has no live connection.
pub const PEER_NOT_CONNECTED: &str = "Target peer not connected";

/// Relay reply to traffic before `register`.
pub const NOT_REGISTERED: &str = "Not registered. Send register message first.";

/// Relay reply to an envelope it cannot parse.
pub const INVALID_FORMAT: &str = "Invalid message format";

/// Relay reply to a well-formed envelope clients may not send.
pub const UNKNOWN_TYPE: &str = "Unknown message type";

/// Relay reply when a sender exceeds its message allowance.
pub const RATE_LIMITED: &str = "Rate limit exceeded";

/// Errors decoding relay traffic.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Not valid JSON, or not a known envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Nonce with the wrong length
    #[error("invalid nonce length: expected {NONCE_SIZE}, got {0}")]
    InvalidNonce(usize),
}

/// Any frame sent to or from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEnvelope {
    /// Client claims a peer id on its connection
    Register(Registration),
    /// Relay acknowledges a registration
    Registered(Registration),
    /// Encrypted message for `to`
    Message(MessageEnvelope),
    /// Ask `to` for its identity public key
    RequestIdentity(IdentityRequest),
    /// Identity public key in answer to a request
    IdentityResponse(IdentityResponse),
    /// Relay-side failure notice
    Error(ErrorNotice),
}

impl RelayEnvelope {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> String {
        let Ok(json) = serde_json::to_string(self) else {
            unreachable!("relay envelopes contain only strings, integers and byte lists");
        };
        json
    }

    /// Decode a JSON text frame.
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Recipient, for envelopes the relay forwards.
    pub fn recipient(&self) -> Option<&PeerId> {
        match self {
            Self::Message(message) => Some(&message.to),
            Self::RequestIdentity(request) => Some(&request.to),
            Self::IdentityResponse(response) => Some(&response.to),
            Self::Register(_) | Self::Registered(_) | Self::Error(_) => None,
        }
    }

    /// Relay error notice with `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice { message: message.into() })
    }
}

/// Peer id claimed on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Claimed id
    pub peer_id: PeerId,
}

/// Ciphertext and nonce as sent over the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// AES-GCM ciphertext including tag
    pub cipher: Vec<u8>,
    /// Nonce bytes
    pub iv: Vec<u8>,
}

/// Cleartext header carried by a relayed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayHeader {
    /// Sender's chain position
    pub count: u32,
    /// Sender's identity public key, used for TOFU pinning on first contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<Vec<u8>>,
}

/// Display rules the sender attaches to a message.
///
/// Enforced by the receiving client only; the relay ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRules {
    /// Remove after first display
    #[serde(default)]
    pub read_once: bool,
    /// Remove after this many seconds (0 = never)
    #[serde(default)]
    pub expires_after_seconds: u64,
}

/// An encrypted message in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Recipient
    pub to: PeerId,
    /// Sender
    pub from: PeerId,
    /// Ciphertext and nonce
    pub encrypted_data: EncryptedData,
    /// Chain position and optional identity key
    pub header: RelayHeader,
    /// Optional display rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<DeliveryRules>,
    /// Sender wall clock, milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl MessageEnvelope {
    /// Wrap an engine message for the relay.
    pub fn new(
        from: PeerId,
        to: PeerId,
        message: EncryptedMessage,
        identity_key: Option<Vec<u8>>,
        timestamp: u64,
    ) -> Self {
        Self {
            to,
            from,
            encrypted_data: EncryptedData {
                cipher: message.ciphertext,
                iv: message.iv.to_vec(),
            },
            header: RelayHeader { count: message.header.count, identity_key },
            rules: None,
            timestamp,
        }
    }

    /// Client-side message id, `"{from}-{timestamp}"`.
    ///
    /// Used to drop duplicate deliveries and as the target of edits and
    /// deletes.
    pub fn message_id(&self) -> String {
        format!("{}-{}", self.from, self.timestamp)
    }

    /// Extract the parts the engine consumes.
    pub fn to_encrypted_message(&self) -> Result<EncryptedMessage, RelayError> {
        let iv = <[u8; NONCE_SIZE]>::try_from(self.encrypted_data.iv.as_slice())
            .map_err(|_| RelayError::InvalidNonce(self.encrypted_data.iv.len()))?;

        Ok(EncryptedMessage {
            header: MessageHeader { count: self.header.count },
            iv,
            ciphertext: self.encrypted_data.cipher.clone(),
        })
    }
}

/// Request for the recipient's identity public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRequest {
    /// Requester
    pub from: PeerId,
    /// Peer being asked
    pub to: PeerId,
}

/// Identity public key sent in answer to an [`IdentityRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    /// Responder
    pub from: PeerId,
    /// Original requester
    pub to: PeerId,
    /// Responder's SEC1 identity public key
    pub public_key: Vec<u8>,
}

/// Relay-side error notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Human-readable reason
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> MessageEnvelope {
        MessageEnvelope::new(
            PeerId::from("alice"),
            PeerId::from("bob"),
            EncryptedMessage {
                header: MessageHeader { count: 3 },
                iv: [9; NONCE_SIZE],
                ciphertext: vec![1, 2, 3],
            },
            None,
            1_700_000_000_000,
        )
    }

    #[test]
    fn register_wire_format() {
        let envelope = RelayEnvelope::Register(Registration { peer_id: PeerId::from("abc") });
        assert_eq!(envelope.to_json(), r#"{"type":"register","peerId":"abc"}"#);
    }

    #[test]
    fn message_uses_camel_case_fields() {
        let json = RelayEnvelope::Message(sample_message()).to_json();

        assert!(json.starts_with(r#"{"type":"message""#));
        assert!(json.contains(r#""encryptedData":{"cipher":[1,2,3]"#));
        assert!(json.contains(r#""header":{"count":3}"#));
        assert!(!json.contains("rules"));
    }

    #[test]
    fn decodes_foreign_identity_response() {
        let json = r#"{"type":"identity_response","from":"b","to":"a","publicKey":[4,1,2]}"#;
        let envelope = RelayEnvelope::from_json(json).unwrap();

        assert_eq!(
            envelope,
            RelayEnvelope::IdentityResponse(IdentityResponse {
                from: PeerId::from("b"),
                to: PeerId::from("a"),
                public_key: vec![4, 1, 2],
            })
        );
        assert_eq!(envelope.recipient(), Some(&PeerId::from("a")));
    }

    #[test]
    fn rules_default_missing_fields() {
        let json = r#"{"type":"message","to":"b","from":"a","encryptedData":{"cipher":[],"iv":[]},
            "header":{"count":0},"rules":{"readOnce":true},"timestamp":5}"#;
        let RelayEnvelope::Message(message) = RelayEnvelope::from_json(json).unwrap() else {
            panic!("expected message");
        };

        let rules = message.rules.unwrap();
        assert!(rules.read_once);
        assert_eq!(rules.expires_after_seconds, 0);
    }

    #[test]
    fn unknown_type_is_malformed() {
        let result = RelayEnvelope::from_json(r#"{"type":"shout","message":"hi"}"#);
        assert!(matches!(result, Err(RelayError::Malformed(_))));
    }

    #[test]
    fn message_id_joins_sender_and_timestamp() {
        assert_eq!(sample_message().message_id(), "alice-1700000000000");
    }

    #[test]
    fn short_nonce_rejected() {
        let mut message = sample_message();
        message.encrypted_data.iv.truncate(8);

        assert!(matches!(message.to_encrypted_message(), Err(RelayError::InvalidNonce(8))));
    }

    #[test]
    fn engine_message_survives_relay_encoding() {
        let message = sample_message().to_encrypted_message().unwrap();

        assert_eq!(message.header.count, 3);
        assert_eq!(message.iv, [9; NONCE_SIZE]);
        assert_eq!(message.ciphertext, vec![1, 2, 3]);
    }
}
