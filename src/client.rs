//! Typed facade over the connection: dispatcher requests and notifications.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::backoff::BackoffBounds;
use crate::bus::{Event, EventBus, HandlerResult, SubscriptionId};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::correlator::RequestCorrelator;
use crate::error::ClientError;
use crate::protocol::{
    LIST_SLAVES, LIST_SOURCES, NOTIFICATION_KINDS, Notification, SLAVE_ADDED, SLAVE_REMOVED, SLAVE_UPDATED, SLAVES,
    SOURCE_UPDATED, SOURCES, Slave, SlaveId, SlaveUpdate, Source, SourceUpdate,
};
use crate::transport::{Connector, WsConnector};

#[derive(Clone)]
pub struct SlaveClient {
    connection: ConnectionManager,
    correlator: RequestCorrelator,
}

impl SlaveClient {
    /// Client on a fresh bus. Nothing connects until [`open`](Self::open).
    #[must_use]
    pub fn new(bounds: BackoffBounds) -> Self {
        Self::with_connection(ConnectionManager::new(EventBus::new(), bounds))
    }

    #[must_use]
    pub fn with_connection(connection: ConnectionManager) -> Self {
        let correlator = RequestCorrelator::new(connection.clone());
        Self { connection, correlator }
    }

    /// Build a client from `config` and start connecting over websockets.
    ///
    /// Subscribe to `open` on the returned client's bus to learn when
    /// requests can be issued.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionManager::open`] failures.
    pub fn connect(config: &ClientConfig) -> Result<(Self, JoinHandle<()>), ClientError> {
        let client = Self::new(config.backoff);
        let task = client.open(WsConnector, config.endpoint.clone())?;
        Ok((client, task))
    }

    /// Start the connection task on `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyStarted`] on a second call.
    pub fn open<C: Connector>(&self, connector: C, url: impl Into<String>) -> Result<JoinHandle<()>, ClientError> {
        self.connection.open(connector, url)
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        self.connection.bus()
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    /// Every slave the dispatcher knows about.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] when not open, [`ClientError::Remote`]
    /// when the dispatcher answers with `error`, [`ClientError::Payload`]
    /// when the answer is not a list of slaves.
    pub async fn list_slaves(&self) -> Result<Vec<Slave>, ClientError> {
        self.call(LIST_SLAVES, Value::Null, SLAVES).await
    }

    /// Sources exposed by slave `id`.
    ///
    /// # Errors
    ///
    /// Same as [`list_slaves`](Self::list_slaves).
    pub async fn list_sources(&self, id: SlaveId) -> Result<Vec<Source>, ClientError> {
        self.call(LIST_SOURCES, json!({ "id": id }), SOURCES).await
    }

    async fn call<T: DeserializeOwned>(&self, outbound: &str, payload: Value, expected: &str) -> Result<T, ClientError> {
        let data = self.correlator.request(outbound, payload, expected)?.await?;
        Ok(serde_json::from_value(data)?)
    }

    // =========================================================================
    // NOTIFICATIONS
    // =========================================================================

    pub fn on_slave_added<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Slave) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_typed(SLAVE_ADDED, handler)
    }

    pub fn on_slave_removed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(SlaveId) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_typed(SLAVE_REMOVED, handler)
    }

    pub fn on_slave_updated<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(SlaveUpdate) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_typed(SLAVE_UPDATED, handler)
    }

    pub fn on_source_updated<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(SourceUpdate) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_typed(SOURCE_UPDATED, handler)
    }

    /// One handler for all four notification kinds, in arrival order.
    ///
    /// A payload that does not parse is reported as a handler failure and
    /// never reaches `handler`.
    pub fn on_notification<F>(&self, handler: F) -> Vec<SubscriptionId>
    where
        F: Fn(Notification) -> HandlerResult + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        NOTIFICATION_KINDS
            .iter()
            .map(|kind| {
                let handler = Arc::clone(&handler);
                self.bus().subscribe(*kind, move |event: &Event| {
                    match Notification::parse(&event.kind, &event.data)? {
                        Some(notification) => handler(notification),
                        None => Ok(()),
                    }
                })
            })
            .collect()
    }

    fn on_typed<T, F>(&self, kind: &str, handler: F) -> SubscriptionId
    where
        T: DeserializeOwned,
        F: Fn(T) -> HandlerResult + Send + Sync + 'static,
    {
        self.bus().subscribe(kind, move |event: &Event| {
            let payload = T::deserialize(&event.data)?;
            handler(payload)
        })
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
