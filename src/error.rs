//! Client error type.
//!
//! Transport and protocol faults never surface here directly: they are
//! published as `error` events on the bus and only reach callers as the
//! rejection of a pending request ([`ClientError::Remote`]).

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A send or request was attempted while the connection was not open.
    #[error("connection is not open")]
    NotConnected,
    /// An inbound frame could not be decoded.
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    /// The request was rejected by an `error` event; carries its payload.
    #[error("remote error: {0}")]
    Remote(Value),
    /// `open` was called on a manager that is already running.
    #[error("connection manager already started")]
    AlreadyStarted,
    /// The pending result was dropped without ever being settled.
    #[error("request abandoned before a response arrived")]
    Abandoned,
    /// The response payload did not match the expected record shape.
    #[error("unexpected response payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ClientError {
    /// Human-readable message for a [`ClientError::Remote`] payload.
    ///
    /// Servers usually publish `{"message": "..."}`; bare strings are
    /// accepted too.
    #[must_use]
    pub fn remote_message(&self) -> Option<&str> {
        let Self::Remote(payload) = self else {
            return None;
        };
        payload
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| payload.as_str())
    }
}
