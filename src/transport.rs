//! Transport seam: an ordered, bidirectional text channel plus lifecycle
//! signals.
//!
//! SYSTEM CONTEXT
//! ==============
//! `ConnectionManager` never touches a socket. It asks a [`Connector`] for a
//! [`Transport`] (two channels) and consumes [`TransportEvent`]s until a
//! `Closed` arrives. [`WsConnector`] bridges a `tokio-tungstenite` stream onto
//! those channels; tests hand out in-memory pairs from [`Transport::pair`].

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};

/// Normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Endpoint going away; the only close code that suppresses reconnection.
pub const GOING_AWAY: u16 = 1001;
/// Close frame arrived without a status code.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Something the transport observed, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text message.
    Message(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// A non-fatal transport fault. A `Closed` follows if the link is gone.
    Error(String),
    /// Terminal: nothing follows.
    Closed { code: u16, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The server answered the upgrade request with a non-101 response.
    #[error("unexpected handshake response: HTTP {status}")]
    UnexpectedResponse { status: u16 },
    #[error("connect failed: {0}")]
    Failed(String),
}

impl From<tungstenite::Error> for ConnectError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Http(response) => Self::UnexpectedResponse { status: response.status().as_u16() },
            other => Self::Failed(other.to_string()),
        }
    }
}

/// The manager's end of an established link.
///
/// Dropping `outbound` asks the far side to close.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The far end of an in-memory [`Transport`].
pub struct TransportPeer {
    /// Text the manager sent.
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Events to feed the manager.
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport {
    /// A linked in-memory transport and its peer.
    #[must_use]
    pub fn pair() -> (Self, TransportPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self { outbound: outbound_tx, inbound: inbound_rx },
            TransportPeer { outbound: outbound_rx, inbound: inbound_tx },
        )
    }
}

/// Opens transports. One call per connection attempt.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Transport, ConnectError>;
}

/// Production connector over `tokio-tungstenite` (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, ConnectError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (transport, peer) = Transport::pair();
        tokio::spawn(pump(stream, peer));
        Ok(transport)
    }
}

/// Shuttle messages between a websocket stream and a transport peer until
/// either side goes away.
async fn pump<S>(stream: WebSocketStream<S>, peer: TransportPeer)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let TransportPeer { outbound: mut outgoing, inbound: events } = peer;
    let (mut ws_write, mut ws_read) = stream.split();

    loop {
        tokio::select! {
            text = outgoing.recv() => {
                let Some(text) = text else {
                    // Manager released the transport.
                    let _ = ws_write.close().await;
                    return;
                };
                if let Err(error) = ws_write.send(Message::text(text)).await {
                    let _ = events.send(TransportEvent::Error(error.to_string()));
                    let _ = events.send(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: String::new() });
                    return;
                }
            }
            message = ws_read.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(_) => TransportEvent::Error("binary message is not valid UTF-8".to_owned()),
                    },
                    Some(Ok(Message::Ping(payload))) => TransportEvent::Ping(payload.to_vec()),
                    Some(Ok(Message::Pong(payload))) => TransportEvent::Pong(payload.to_vec()),
                    Some(Ok(Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map_or((NO_STATUS, String::new()), |f| (u16::from(f.code), f.reason.as_str().to_owned()));
                        // Flush the close reply tungstenite queued for us.
                        let _ = ws_write.close().await;
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Err(error)) => {
                        let _ = events.send(TransportEvent::Error(error.to_string()));
                        let _ = events.send(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: String::new() });
                        return;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed { code: ABNORMAL_CLOSURE, reason: String::new() });
                        return;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
