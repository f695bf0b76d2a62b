//! Dispatcher wire vocabulary: event names and typed payloads.
//!
//! DESIGN
//! ======
//! Records keep only the fields the client reasons about (`id`, `sources`,
//! `address`) as typed fields; everything else the dispatcher sends is kept
//! verbatim in a flattened `properties` map so serde round-trips stay
//! lossless. Presentation state never lives here.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const LIST_SLAVES: &str = "listSlaves";
pub const SLAVES: &str = "slaves";
pub const LIST_SOURCES: &str = "listSources";
pub const SOURCES: &str = "sources";

pub const SLAVE_ADDED: &str = "slaveAdded";
pub const SLAVE_REMOVED: &str = "slaveRemoved";
pub const SLAVE_UPDATED: &str = "slaveUpdated";
pub const SOURCE_UPDATED: &str = "sourceUpdated";

pub const NOTIFICATION_KINDS: [&str; 4] = [SLAVE_ADDED, SLAVE_REMOVED, SLAVE_UPDATED, SOURCE_UPDATED];

/// Transport lifecycle signals re-emitted on the bus.
pub const EVENT_OPEN: &str = "open";
pub const EVENT_CLOSE: &str = "close";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_UNEXPECTED_RESPONSE: &str = "unexpected-response";
pub const EVENT_PING: &str = "ping";
pub const EVENT_PONG: &str = "pong";
/// Published by the manager itself when a reconnect is scheduled.
pub const EVENT_RECONNECT: &str = "reconnect";

// =============================================================================
// RECORDS
// =============================================================================

/// Slave identifier. The dispatcher sends numbers, and sometimes numeric
/// strings in notifications; both decode to the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SlaveId(pub u64);

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for SlaveId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(number) => number
                .as_u64()
                .map(Self)
                .ok_or_else(|| D::Error::custom("slave id must be a non-negative integer")),
            Value::String(text) => text
                .trim()
                .parse::<u64>()
                .map(Self)
                .map_err(|_| D::Error::custom(format!("slave id is not numeric: {text:?}"))),
            _ => Err(D::Error::custom("expected slave id number or string")),
        }
    }
}

/// A slave device as listed by the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Slave {
    pub id: SlaveId,
    /// Present once sources have been fetched or pushed with the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// A data source exposed by a slave.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Matched by strict equality against `sourceUpdated.addr`.
    pub address: Value,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Payload of `slaveUpdated`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlaveUpdate {
    pub id: SlaveId,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Payload of `sourceUpdated`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceUpdate {
    pub id: SlaveId,
    pub addr: Value,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// An unsolicited topology or state change pushed by the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    SlaveAdded(Slave),
    SlaveRemoved(SlaveId),
    SlaveUpdated(SlaveUpdate),
    SourceUpdated(SourceUpdate),
}

impl Notification {
    /// Parse a notification from an event name and payload.
    ///
    /// Returns `Ok(None)` when `kind` is not a notification type.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the payload does not match the type.
    pub fn parse(kind: &str, data: &Value) -> Result<Option<Self>, serde_json::Error> {
        let notification = match kind {
            SLAVE_ADDED => Self::SlaveAdded(Slave::deserialize(data)?),
            SLAVE_REMOVED => Self::SlaveRemoved(SlaveId::deserialize(data)?),
            SLAVE_UPDATED => Self::SlaveUpdated(SlaveUpdate::deserialize(data)?),
            SOURCE_UPDATED => Self::SourceUpdated(SourceUpdate::deserialize(data)?),
            _ => return Ok(None),
        };
        Ok(Some(notification))
    }

    /// Event name this notification arrives under.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SlaveAdded(_) => SLAVE_ADDED,
            Self::SlaveRemoved(_) => SLAVE_REMOVED,
            Self::SlaveUpdated(_) => SLAVE_UPDATED,
            Self::SourceUpdated(_) => SOURCE_UPDATED,
        }
    }

    /// Slave the notification is about.
    #[must_use]
    pub fn slave_id(&self) -> SlaveId {
        match self {
            Self::SlaveAdded(slave) => slave.id,
            Self::SlaveRemoved(id) => *id,
            Self::SlaveUpdated(update) => update.id,
            Self::SourceUpdated(update) => update.id,
        }
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
