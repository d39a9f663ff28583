//! Wire format for the sync protocol.
//!
//! Every transport message is one JSON object:
//!
//! ```text
//! {"messageType": <1..4>, "key": "<key>", "data": "<payload>"}
//! ```
//!
//! `messageType` is `Set = 1`, `Emit = 2`, `Get = 3`, `Error = 4`. The server answers a
//! `Get` with another `Get` carrying `data`. `data` is itself the JSON encoding of the
//! mirrored value, encoded exactly once.

use crate::{PocaError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Message kind carried in the `messageType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Set,
    Emit,
    Get,
    Error,
}

impl MessageKind {
    pub fn code(self) -> u8 {
        match self {
            MessageKind::Set => 1,
            MessageKind::Emit => 2,
            MessageKind::Get => 3,
            MessageKind::Error => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageKind::Set),
            2 => Some(MessageKind::Emit),
            3 => Some(MessageKind::Get),
            4 => Some(MessageKind::Error),
            _ => None,
        }
    }

    fn requires_key(self) -> bool {
        matches!(self, MessageKind::Set | MessageKind::Get)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Set => "Set",
            MessageKind::Emit => "Emit",
            MessageKind::Get => "Get",
            MessageKind::Error => "Error",
        };
        f.write_str(name)
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub key: Option<String>,
    pub payload: Option<String>,
}

impl Envelope {
    /// Request the current value of `key`.
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Get,
            key: Some(key.into()),
            payload: None,
        }
    }

    /// Push a new value for `key`.
    pub fn set(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Set,
            key: Some(key.into()),
            payload: Some(payload.into()),
        }
    }

    /// Fire a named signal. No response is expected.
    pub fn emit(signal: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Emit,
            key: Some(signal.into()),
            payload: None,
        }
    }

    /// Key of the envelope, or an empty string for keyless messages.
    pub fn key_or_empty(&self) -> &str {
        self.key.as_deref().unwrap_or_default()
    }
}

/// On-the-wire shape. Kept private so the integer code never leaks past the codec.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(alias = "message_type")]
    message_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

/// Encode an envelope into a transport text message.
pub fn encode(envelope: &Envelope) -> Result<String> {
    let wire = WireMessage {
        message_type: envelope.kind.code(),
        key: envelope.key.clone(),
        data: envelope.payload.clone(),
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Decode a transport text message into an envelope.
///
/// Fails with `UnknownKind` for unrecognized kind codes and with a protocol error when
/// a Set or Get arrives without a key.
pub fn decode(text: &str) -> Result<Envelope> {
    let wire: WireMessage = serde_json::from_str(text)?;
    let kind =
        MessageKind::from_code(wire.message_type).ok_or(PocaError::UnknownKind(wire.message_type))?;

    if kind.requires_key() && wire.key.is_none() {
        return Err(PocaError::protocol(format!("{} message without a key", kind)));
    }

    Ok(Envelope {
        kind,
        key: wire.key,
        payload: wire.data,
    })
}

/// Encode a mirrored value into a payload string.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a payload string into a mirrored value.
pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T> {
    Ok(serde_json::from_str(payload)?)
}
