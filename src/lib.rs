//! slavelink: resilient websocket client for the slave dispatcher.
//!
//! ARCHITECTURE
//! ============
//! One [`ConnectionManager`] task owns the websocket, re-emits everything it
//! receives on an [`EventBus`], and reconnects with [`BackoffPolicy`] delays
//! unless the server closes with 1001. [`RequestCorrelator`] layers
//! request/response over that one-way channel, and [`SlaveClient`] exposes the
//! dispatcher's typed API on top. [`SlaveDirectory`] is an optional local
//! replica driven by the push notifications.

pub mod backoff;
pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use backoff::{BackoffBounds, BackoffPolicy, ReconnectContext};
pub use bus::{Event, EventBus, HandlerError, HandlerResult, SubscriptionId};
pub use client::SlaveClient;
pub use config::{ClientConfig, ConfigError, endpoint_for_page};
pub use connection::{ConnectionManager, ConnectionState};
pub use correlator::{PendingResponse, RequestCorrelator};
pub use directory::SlaveDirectory;
pub use error::ClientError;
pub use frames::{CodecError, Frame};
pub use protocol::{Notification, Slave, SlaveId, SlaveUpdate, Source, SourceUpdate};
pub use transport::{ConnectError, Connector, Transport, TransportEvent, WsConnector};
