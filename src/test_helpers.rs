//! Shared fixtures for unit tests: a scripted in-memory connector, a fixed
//! RNG, and bus recorders.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::backoff::BackoffBounds;
use crate::bus::{Event, EventBus};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::transport::{ConnectError, Connector, Transport, TransportEvent, TransportPeer};

pub const TEST_URL: &str = "ws://dispatcher.test:3004/ws";

/// Returns the same word forever: `0` yields zero jitter, `u64::MAX` the
/// largest jitter below one second.
pub struct FixedRng(pub u64);

impl RngCore for FixedRng {
    #[allow(clippy::cast_possible_truncation)]
    fn next_u32(&mut self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        dst.fill(0);
    }
}

type Outcome = Result<Transport, ConnectError>;

/// Connector whose every attempt waits for the test to script an outcome.
pub struct ScriptedConnector {
    outcomes: Arc<Mutex<mpsc::UnboundedReceiver<Outcome>>>,
    calls: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Transport, ConnectError> {
        let _ = self.calls.send(url.to_owned());
        let mut outcomes = self.outcomes.lock().await;
        match outcomes.recv().await {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub calls: mpsc::UnboundedReceiver<String>,
    outcomes: mpsc::UnboundedSender<Outcome>,
    connector: Option<ScriptedConnector>,
}

impl Harness {
    /// Manager with default bounds and zero jitter.
    pub fn new() -> Self {
        Self::with_bounds(BackoffBounds::default())
    }

    pub fn with_bounds(bounds: BackoffBounds) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let connector = ScriptedConnector { outcomes: Arc::new(Mutex::new(outcomes_rx)), calls: calls_tx };
        Self {
            manager: ConnectionManager::with_rng(EventBus::new(), bounds, FixedRng(0)),
            calls: calls_rx,
            outcomes: outcomes_tx,
            connector: Some(connector),
        }
    }

    pub fn start(&mut self) -> JoinHandle<()> {
        let connector = self.connector.take().expect("harness already started");
        self.manager.open(connector, TEST_URL).expect("manager should start")
    }

    /// Script the next connect attempt to succeed.
    pub fn accept(&self) -> TransportPeer {
        let (transport, peer) = Transport::pair();
        self.outcomes.send(Ok(transport)).expect("connector alive");
        peer
    }

    /// Script the next connect attempt to fail.
    pub fn refuse(&self, error: ConnectError) {
        self.outcomes.send(Err(error)).expect("connector alive");
    }

    pub async fn next_call(&mut self) -> String {
        within(self.calls.recv()).await.expect("connector dropped")
    }
}

/// Harness whose manager is already `Open` on the returned peer.
pub async fn open_harness() -> (Harness, TransportPeer) {
    let mut harness = Harness::new();
    let peer = harness.accept();
    harness.start();
    within(harness.manager.wait_for(ConnectionState::Open)).await;
    (harness, peer)
}

pub async fn within<F: Future>(fut: F) -> F::Output {
    timeout(Duration::from_secs(60), fut).await.expect("test step timed out")
}

/// Forward every event of the given kinds into a channel.
pub fn record(bus: &EventBus, kinds: &[&str]) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = tx.clone();
        bus.subscribe(*kind, move |event: &Event| {
            let _ = tx.send(event.clone());
            Ok(())
        });
    }
    rx
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    within(rx.recv()).await.expect("recorder closed")
}

/// Next text the manager wrote to `peer`, decoded.
pub async fn next_sent(peer: &mut TransportPeer) -> frames::Frame {
    let text = within(peer.outbound.recv()).await.expect("outbound closed");
    frames::decode_frame(&text).expect("manager sent an invalid frame")
}

pub fn push(peer: &TransportPeer, text: impl Into<String>) {
    peer.inbound.send(TransportEvent::Message(text.into())).expect("manager alive");
}
