//! Application message body, serialized to JSON before padding.

use serde::{Deserialize, Serialize};

/// What a decrypted message asks the receiver to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// New text message
    Text {
        /// Message text
        content: String,
    },
    /// Replace the text of an earlier message
    Edit {
        /// Relay id of the message being edited
        id: String,
        /// Replacement text
        content: String,
    },
    /// Recall an earlier message
    Delete {
        /// Relay id of the message being recalled
        id: String,
    },
}

impl MessageBody {
    /// Encode as JSON text.
    pub fn to_json(&self) -> String {
        let Ok(json) = serde_json::to_string(self) else {
            unreachable!("message body has only string fields");
        };
        json
    }

    /// Decode a decrypted body.
    ///
    /// Bodies that are not a recognised envelope are treated as plain text,
    /// so peers that send raw strings still interoperate.
    pub fn from_plaintext(plaintext: &[u8]) -> Self {
        serde_json::from_slice(plaintext).unwrap_or_else(|_| Self::Text {
            content: String::from_utf8_lossy(plaintext).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_wire_format() {
        let body = MessageBody::Text { content: "hi".into() };
        assert_eq!(body.to_json(), r#"{"type":"text","content":"hi"}"#);
    }

    #[test]
    fn edit_and_delete_decode() {
        let edit = MessageBody::from_plaintext(br#"{"type":"edit","id":"a-1","content":"fixed"}"#);
        assert_eq!(edit, MessageBody::Edit { id: "a-1".into(), content: "fixed".into() });

        let delete = MessageBody::from_plaintext(br#"{"type":"delete","id":"a-1"}"#);
        assert_eq!(delete, MessageBody::Delete { id: "a-1".into() });
    }

    #[test]
    fn raw_text_falls_back() {
        let body = MessageBody::from_plaintext(b"just words");
        assert_eq!(body, MessageBody::Text { content: "just words".into() });
    }
}
