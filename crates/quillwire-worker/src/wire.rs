//! JSON command codec.
//!
//! Requests are `{"id", "type", "payload"}`; responses are `{"id", "result"}`
//! or `{"id", "error": {"class", "message"}}`. The `id` is chosen by the
//! foreign caller and echoed verbatim; internal correlation uses its own
//! tokens.
//!
//! | `type` | payload | result |
//! |---|---|---|
//! | `INIT_IDENTITY` | none, or `{publicKey, privateKey}` | `{publicKey, privateKey}` |
//! | `INIT_SESSION` | `{peerId, peerPublicKey, isInitiator}` | `{status: "OK"}` |
//! | `ENCRYPT` | `{peerId, text}` | `{header: {count}, iv, ciphertext}` |
//! | `DECRYPT` | `{peerId, ciphertext, iv, header: {count}}` | plaintext string |
//! | `CLEAR_STATE` | none | `{status: "FULL_WIPE"}` |
//! | `ZEROIZE_SESSION` | `{peerId}` | `{status: "CLEARED"}` |

use quillwire_core::{EncryptedMessage, ErrorClass, IdentityRecord, MessageHeader, PeerId, Role};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use zeroize::Zeroizing;

use crate::{
    command::{Command, Reply},
    error::CommandError,
    handle::{EngineHandle, PendingReply},
};

#[derive(Deserialize)]
struct RawRequest {
    #[serde(default)]
    id: Value,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitSessionPayload {
    peer_id: PeerId,
    peer_public_key: Vec<u8>,
    is_initiator: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptPayload {
    peer_id: PeerId,
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptPayload {
    peer_id: PeerId,
    ciphertext: Vec<u8>,
    iv: Vec<u8>,
    header: MessageHeader,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerPayload {
    peer_id: PeerId,
}

#[derive(Serialize)]
struct WireError {
    class: ErrorClass,
    message: String,
}

/// Decode a JSON request into its caller id and typed command.
///
/// When decoding fails the error is paired with whatever id could be read
/// (`null` if none), so the caller can still be answered.
pub fn decode_request(json: &str) -> Result<(Value, Command), (Value, CommandError)> {
    let raw: RawRequest = serde_json::from_str(json).map_err(|err| {
        let id = serde_json::from_str::<Value>(json)
            .ok()
            .and_then(|value| value.get("id").cloned())
            .unwrap_or(Value::Null);
        (id, CommandError::MalformedCommand(err.to_string()))
    })?;

    match decode_command(&raw.kind, raw.payload) {
        Ok(command) => Ok((raw.id, command)),
        Err(err) => Err((raw.id, err)),
    }
}

fn decode_command(kind: &str, payload: Value) -> Result<Command, CommandError> {
    match kind {
        "INIT_IDENTITY" | "IMPORT_IDENTITY" => {
            let existing =
                if is_empty(&payload) { None } else { Some(parse::<IdentityRecord>(payload)?) };
            Ok(Command::InitIdentity { existing })
        },
        "INIT_SESSION" => {
            let payload: InitSessionPayload = parse(payload)?;
            let role = if payload.is_initiator { Role::Initiator } else { Role::Responder };
            Ok(Command::InitSession {
                peer_id: payload.peer_id,
                peer_public_key: payload.peer_public_key,
                role,
            })
        },
        "ENCRYPT" => {
            let payload: EncryptPayload = parse(payload)?;
            Ok(Command::Encrypt { peer_id: payload.peer_id, text: Zeroizing::new(payload.text) })
        },
        "DECRYPT" => {
            let payload: DecryptPayload = parse(payload)?;
            let iv = payload.iv.as_slice().try_into().map_err(|_| {
                let len = payload.iv.len();
                CommandError::MalformedCommand(format!("iv must be 12 bytes, got {len}"))
            })?;
            let message =
                EncryptedMessage { header: payload.header, iv, ciphertext: payload.ciphertext };
            Ok(Command::Decrypt { peer_id: payload.peer_id, message })
        },
        "CLEAR_STATE" => Ok(Command::ClearState),
        "ZEROIZE_SESSION" => {
            let payload: PeerPayload = parse(payload)?;
            Ok(Command::ZeroizeSession { peer_id: payload.peer_id })
        },
        other => Err(CommandError::UnknownCommand(other.to_owned())),
    }
}

fn is_empty(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, CommandError> {
    serde_json::from_value(payload).map_err(|err| CommandError::MalformedCommand(err.to_string()))
}

/// Encode a command outcome as a JSON response.
pub fn encode_response(id: Value, result: &Result<Reply, CommandError>) -> String {
    let response = match result {
        Ok(reply) => json!({ "id": id, "result": encode_reply(reply) }),
        Err(err) => {
            let error = WireError { class: err.class(), message: err.to_string() };
            json!({ "id": id, "error": error })
        },
    };
    response.to_string()
}

fn encode_reply(reply: &Reply) -> Value {
    match reply {
        Reply::Identity(record) => json!(record),
        Reply::Status(status) => json!({ "status": status.as_str() }),
        Reply::Encrypted(message) => json!(message),
        Reply::Plaintext(text) => Value::String(text.clone()),
    }
}

/// A JSON request after submission: queued on the engine, or already
/// answered because it never reached it.
pub enum Submitted {
    /// Response ready without an engine round trip
    Answered(String),
    /// Command queued; the reply is still outstanding
    Queued {
        /// Caller's request id
        id: Value,
        /// Outstanding reply
        reply: PendingReply,
    },
}

impl Submitted {
    /// Wait for the outcome and encode it as a JSON response.
    pub async fn response(self) -> String {
        match self {
            Self::Answered(response) => response,
            Self::Queued { id, reply } => encode_response(id, &reply.wait().await),
        }
    }
}

/// Decode `json` and queue it on the engine without waiting for the reply.
///
/// Requests submitted one after another run in that order.
pub async fn submit_json(handle: &EngineHandle, json: &str) -> Submitted {
    match decode_request(json) {
        Ok((id, command)) => match handle.submit(command).await {
            Ok(reply) => Submitted::Queued { id, reply },
            Err(err) => Submitted::Answered(encode_response(id, &Err(err))),
        },
        Err((id, err)) => {
            tracing::debug!(%err, "rejecting malformed request");
            Submitted::Answered(encode_response(id, &Err(err)))
        },
    }
}

/// Decode `json`, run it on the engine and encode the reply.
///
/// Never fails: every outcome, including malformed input, becomes a tagged
/// response.
pub async fn dispatch_json(handle: &EngineHandle, json: &str) -> String {
    submit_json(handle, json).await.response().await
}
