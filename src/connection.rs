//! Connection lifecycle: one transport, its state, and reconnection.
//!
//! ARCHITECTURE
//! ============
//! `open` spawns a single tokio task that owns the transport. The task loops:
//! connect, publish `open`, pump inbound events onto the bus in arrival order,
//! and on closure either stop (close code 1001) or ask the backoff policy for
//! a delay, publish `reconnect`, sleep, and connect again. Every bus handler
//! runs on that task, one event at a time, so delivery order matches wire
//! order.
//!
//! `ConnectionManager` itself is a cheap handle (`Arc` inside). `send` works
//! from any task: it checks the shared state and pushes encoded text into the
//! current transport's outbound channel without awaiting.
//!
//! LIMITATIONS
//! ===========
//! A scheduled reconnect cannot be cancelled, and there is no teardown path
//! short of a 1001 close or aborting the task returned by `open`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::Frame;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backoff::{BackoffBounds, BackoffPolicy, ReconnectContext};
use crate::bus::{Event, EventBus};
use crate::error::ClientError;
use crate::protocol::{
    EVENT_CLOSE, EVENT_ERROR, EVENT_OPEN, EVENT_PING, EVENT_PONG, EVENT_RECONNECT, EVENT_UNEXPECTED_RESPONSE,
};
use crate::transport::{ABNORMAL_CLOSURE, ConnectError, Connector, GOING_AWAY, Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, `open` not yet called.
    Idle,
    Connecting,
    Open,
    /// Transport closed, teardown in progress.
    Closing,
    Closed,
}

type Backoff = BackoffPolicy<Box<dyn RngCore + Send>>;

struct Shared {
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    backoff: Mutex<Backoff>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Decode one inbound text message into a bus event.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] for text that is not a valid frame.
pub fn decode_inbound(text: &str) -> Result<Event, ClientError> {
    let frame = frames::decode_frame(text)?;
    Ok(Event { kind: frame.kind, correlation_id: frame.id, data: frame.data })
}

impl ConnectionManager {
    /// Manager with OS-seeded backoff jitter.
    #[must_use]
    pub fn new(bus: EventBus, bounds: BackoffBounds) -> Self {
        Self::with_rng(bus, bounds, StdRng::from_os_rng())
    }

    /// Manager drawing backoff jitter from `rng`.
    pub fn with_rng<R>(bus: EventBus, bounds: BackoffBounds, rng: R) -> Self
    where
        R: RngCore + Send + 'static,
    {
        let rng: Box<dyn RngCore + Send> = Box::new(rng);
        let backoff = BackoffPolicy::with_rng(bounds, rng);
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(Shared { bus, state, outbound: Mutex::new(None), backoff: Mutex::new(backoff) }),
        }
    }

    /// Start the connection task. Idle -> Connecting.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyStarted`] if the manager has left `Idle`.
    pub fn open<C: Connector>(&self, connector: C, url: impl Into<String>) -> Result<JoinHandle<()>, ClientError> {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Idle {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ClientError::AlreadyStarted);
        }

        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(shared.run(connector, url.into())))
    }

    /// Encode and send `frame` on the open transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] unless the state is `Open`. No
    /// retry is attempted and nothing is queued.
    pub fn send(&self, frame: &Frame) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let outbound = self.shared.lock_outbound();
        let Some(tx) = outbound.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        tx.send(frames::encode_frame(frame)).map_err(|_| ClientError::NotConnected)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Resolve once the state equals `target` (immediately if it already does).
    pub async fn wait_for(&self, target: ConnectionState) {
        let mut rx = self.watch_state();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.shared.lock_backoff().attempt()
    }

    #[must_use]
    pub fn reconnect_context(&self) -> ReconnectContext {
        self.shared.lock_backoff().context()
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }
}

impl Shared {
    async fn run<C: Connector>(self: Arc<Self>, connector: C, url: String) {
        loop {
            let attempt = self.lock_backoff().attempt();
            tracing::info!(%url, attempt, "connecting");
            let (code, reason) = match connector.connect(&url).await {
                Ok(transport) => self.drive(transport).await,
                Err(error) => {
                    self.connect_failed(&error);
                    (ABNORMAL_CLOSURE, String::new())
                }
            };

            if !self.on_close(code, &reason) {
                return;
            }
            let delay = self.reconnect();
            tokio::time::sleep(delay).await;
            self.state.send_replace(ConnectionState::Connecting);
        }
    }

    /// Pump one transport until it closes. Returns the close code and reason.
    async fn drive(&self, transport: Transport) -> (u16, String) {
        let Transport { outbound, mut inbound } = transport;
        self.on_open(outbound);

        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Message(text) => self.on_message(&text),
                TransportEvent::Ping(payload) => {
                    self.bus.emit(EVENT_PING, json!(payload));
                }
                TransportEvent::Pong(payload) => {
                    self.bus.emit(EVENT_PONG, json!(payload));
                }
                TransportEvent::Error(message) => {
                    tracing::warn!(%message, "transport error");
                    self.bus.emit(EVENT_ERROR, json!({ "message": message }));
                }
                TransportEvent::Closed { code, reason } => {
                    self.begin_close();
                    return (code, reason);
                }
            }
        }

        // Peer dropped its sender without a close event.
        self.begin_close();
        (ABNORMAL_CLOSURE, String::new())
    }

    fn on_open(&self, outbound: mpsc::UnboundedSender<String>) {
        *self.lock_outbound() = Some(outbound);
        self.lock_backoff().reset();
        self.state.send_replace(ConnectionState::Open);
        tracing::info!("connection open");
        self.bus.emit(EVENT_OPEN, Value::Null);
    }

    fn on_message(&self, text: &str) {
        match decode_inbound(text) {
            Ok(event) => {
                self.bus.publish(&event);
            }
            Err(error) => {
                tracing::warn!(%error, "dropping undecodable frame");
                self.bus.emit(EVENT_ERROR, json!({ "message": error.to_string(), "payload": text }));
            }
        }
    }

    fn connect_failed(&self, error: &ConnectError) {
        tracing::warn!(%error, "connect attempt failed");
        match error {
            ConnectError::UnexpectedResponse { status } => {
                self.bus.emit(EVENT_UNEXPECTED_RESPONSE, json!({ "status": status }));
            }
            ConnectError::Failed(message) => {
                self.bus.emit(EVENT_ERROR, json!({ "message": message }));
            }
        }
    }

    fn begin_close(&self) {
        self.state.send_replace(ConnectionState::Closing);
        self.lock_outbound().take();
    }

    /// Record the closure. Returns `true` when a reconnect should follow.
    fn on_close(&self, code: u16, reason: &str) -> bool {
        self.lock_outbound().take();
        self.state.send_replace(ConnectionState::Closed);
        self.bus.emit(EVENT_CLOSE, json!({ "code": code, "reason": reason }));

        if code == GOING_AWAY {
            tracing::info!(code, "connection closed by peer; not reconnecting");
            false
        } else {
            tracing::warn!(code, %reason, "abnormal closure");
            true
        }
    }

    /// Advance the backoff policy and announce the pending attempt.
    fn reconnect(&self) -> Duration {
        let (delay, attempt) = {
            let mut backoff = self.lock_backoff();
            let delay = backoff.next_delay();
            (delay, backoff.attempt())
        };
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(attempt, delay_ms, "scheduling reconnect");
        self.bus.emit(EVENT_RECONNECT, json!({ "attempt": attempt, "delayMs": delay_ms }));
        delay
    }

    fn lock_outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_backoff(&self) -> MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
