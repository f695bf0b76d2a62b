//! Shared frame model and JSON text codec for the slave websocket transport.
//!
//! This crate owns the wire representation used by the client and any peer
//! that speaks the dispatcher protocol. Every message, inbound or outbound, is
//! a single text envelope:
//!
//! ```json
//! {"type": "listSources", "data": {"id": 3}, "id": "6f1c..."}
//! ```
//!
//! `data` is omitted when the frame carries no payload and `id` is omitted
//! for uncorrelated frames, so a plain notification encodes as exactly
//! `{type, data}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not well-formed JSON, or a field has the wrong shape.
    #[error("failed to decode frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The text parsed, but the top-level value is not a JSON object.
    #[error("frame must be a JSON object")]
    NotAnObject,
    /// The envelope has no `type` field.
    #[error("frame is missing the `type` field")]
    MissingType,
    /// The `type` field is present but is not a string.
    #[error("frame `type` must be a string")]
    InvalidType,
}

/// A single message on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event or request name, e.g. `"listSlaves"` or `"slaveAdded"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary JSON payload. `Value::Null` means "no payload".
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Correlation identifier echoed by the server on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Frame {
    /// Create an uncorrelated frame.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), data, id: None }
    }

    /// Attach a correlation identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Encode `type` + `data` into canonical frame text.
#[must_use]
pub fn encode(kind: &str, data: Value) -> String {
    encode_frame(&Frame::new(kind, data))
}

/// Encode a frame into JSON text.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    // Serializing a struct of strings and `Value`s cannot fail: all map keys
    // are strings and there are no custom `Serialize` impls in the tree.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode JSON text into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed text, [`CodecError::NotAnObject`]
/// when the top-level value is not an object, and [`CodecError::MissingType`] /
/// [`CodecError::InvalidType`] when the `type` field is absent or not a string.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Some(envelope) = value.as_object() else {
        return Err(CodecError::NotAnObject);
    };
    match envelope.get("type") {
        None => return Err(CodecError::MissingType),
        Some(Value::String(_)) => {}
        Some(_) => return Err(CodecError::InvalidType),
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
