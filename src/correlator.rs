//! Request/response on top of the fire-and-forget frame channel.
//!
//! DESIGN
//! ======
//! Each call gets a fresh UUID that travels in the outbound frame's `id`.
//! The call registers two one-shot bus subscriptions filtered by that id: one
//! for the expected response type and one for `error`. Whichever fires first
//! settles the call and removes the other, so a settled call leaves nothing
//! behind on the bus.
//!
//! Servers that do not echo `id` still work: uncorrelated events reach every
//! pending subscription of that type in registration order, and an
//! uncorrelated `error` rejects every pending call.
//!
//! LIMITATIONS
//! ===========
//! There is no timeout. A call the server never answers stays pending until
//! the caller stops waiting (e.g. `tokio::time::timeout`). Dropping the
//! [`PendingResponse`] does not withdraw the request.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use frames::Frame;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::bus::{Event, EventBus, SubscriptionId};
use crate::connection::ConnectionManager;
use crate::error::ClientError;
use crate::protocol::EVENT_ERROR;

type Outcome = Result<Value, ClientError>;

struct Slot {
    sender: Option<oneshot::Sender<Outcome>>,
    subscriptions: Vec<SubscriptionId>,
}

/// Settle-at-most-once cell shared by a call's two subscriptions.
struct Settlement {
    bus: EventBus,
    slot: Mutex<Slot>,
}

impl Settlement {
    fn new(bus: EventBus, sender: oneshot::Sender<Outcome>) -> Self {
        Self { bus, slot: Mutex::new(Slot { sender: Some(sender), subscriptions: Vec::new() }) }
    }

    /// Remember the call's subscriptions, or drop them at once if an event
    /// already settled the call while they were being registered.
    fn track(&self, ids: [SubscriptionId; 2]) {
        let mut slot = self.lock();
        if slot.sender.is_some() {
            slot.subscriptions.extend(ids);
            return;
        }
        drop(slot);
        for id in ids {
            self.bus.unsubscribe(id);
        }
    }

    fn settle(&self, outcome: Outcome) {
        let (sender, subscriptions) = {
            let mut slot = self.lock();
            let Some(sender) = slot.sender.take() else {
                return;
            };
            (sender, std::mem::take(&mut slot.subscriptions))
        };
        for id in subscriptions {
            self.bus.unsubscribe(id);
        }
        // The caller may have stopped waiting.
        let _ = sender.send(outcome);
    }

    /// Withdraw without settling; the receiver sees `Abandoned`.
    fn cancel(&self) {
        let subscriptions = {
            let mut slot = self.lock();
            slot.sender = None;
            std::mem::take(&mut slot.subscriptions)
        };
        for id in subscriptions {
            self.bus.unsubscribe(id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deferred result of [`RequestCorrelator::request`].
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingResponse {
    /// Correlation id sent with the request.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ClientError::Abandoned)))
    }
}

#[derive(Clone)]
pub struct RequestCorrelator {
    connection: ConnectionManager,
}

impl RequestCorrelator {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Send `outbound` with `payload` and wait for an `expected` event.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] immediately when the connection
    /// is not open. The returned future resolves to the response payload,
    /// or to [`ClientError::Remote`] if an `error` event arrives first.
    pub fn request(&self, outbound: &str, payload: Value, expected: &str) -> Result<PendingResponse, ClientError> {
        if !self.connection.is_open() {
            return Err(ClientError::NotConnected);
        }

        let id = Uuid::new_v4().to_string();
        let bus = self.connection.bus();
        let (tx, rx) = oneshot::channel();
        let settlement = Arc::new(Settlement::new(bus.clone(), tx));

        let on_response = {
            let settlement = Arc::clone(&settlement);
            move |event: &Event| {
                settlement.settle(Ok(event.data.clone()));
                Ok(())
            }
        };
        let on_error = {
            let settlement = Arc::clone(&settlement);
            move |event: &Event| {
                settlement.settle(Err(ClientError::Remote(event.data.clone())));
                Ok(())
            }
        };
        let response_sub = bus.subscribe_once_correlated(expected, id.as_str(), on_response);
        let error_sub = bus.subscribe_once_correlated(EVENT_ERROR, id.as_str(), on_error);
        settlement.track([response_sub, error_sub]);

        let frame = Frame::new(outbound, payload).with_id(id.as_str());
        if let Err(error) = self.connection.send(&frame) {
            settlement.cancel();
            return Err(error);
        }
        tracing::debug!(request = outbound, %id, expected, "request sent");

        Ok(PendingResponse { id, rx })
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
