//! Transport seam between the connection state machine and the wire.
//!
//! A [`TransportFactory`] produces one fresh [`Channel`] per connect
//! attempt (the "forced new connection" behavior). The production factory
//! is [`WsFactory`] — a plain WebSocket client to the companion process's
//! local endpoint — but the state machine only ever sees the factory
//! trait, so tests drive it with an in-memory channel built from
//! [`Channel::pair`].
//!
//! A live channel is a pair of queues: an outbound frame sender drained by
//! a writer task (order-preserving, one writer per channel) and an inbound
//! event stream. Dropping both halves closes the underlying socket; there
//! is no separate close handshake.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::debug;

use crate::error::TransportError;

/// What the transport reports back to the connection task.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame arrived from the companion process.
    Inbound(String),
    /// The channel dropped (remote close, network error).
    Closed,
}

/// A live (or just-opened) channel to the companion process.
pub struct Channel {
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Channel {
    /// Queue a text frame for transmission, preserving call order.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Send)
    }

    /// A clone of the outbound sender, for the send path that lives
    /// outside the connection task.
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.outbound.clone()
    }

    /// `false` once the writer side has shut down — frames would be lost.
    pub fn is_live(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Next transport event; `None` when the transport side has gone away
    /// entirely (treated the same as [`TransportEvent::Closed`]).
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// In-memory channel for tests and alternate transports: the
    /// returned [`ChannelDriver`] plays the role of the remote end.
    pub fn pair() -> (Channel, ChannelDriver) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Channel {
                outbound: out_tx,
                events: ev_rx,
            },
            ChannelDriver {
                outbound: out_rx,
                events: ev_tx,
            },
        )
    }
}

/// The far end of an in-memory [`Channel`]: receives what the connection
/// sends, injects inbound events, and closes the channel by dropping.
pub struct ChannelDriver {
    /// Frames the connection has written, in send order.
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Inject inbound frames / close notifications.
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// Opens one fresh channel per connect attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    async fn open(&self) -> Result<Channel, TransportError>;
}

/// Production transport: WebSocket client to the companion's local
/// endpoint.
pub struct WsFactory {
    url: String,
}

impl WsFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportFactory for WsFactory {
    async fn open(&self) -> Result<Channel, TransportError> {
        let (ws, _response) = match connect_async(self.url.as_str()).await {
            Ok(ok) => ok,
            Err(tungstenite::Error::Url(e)) => {
                return Err(TransportError::Endpoint(e.to_string()));
            }
            Err(e) => {
                return Err(TransportError::Connect(
                    anyhow::Error::new(e).context(format!("connecting to {}", self.url)),
                ));
            }
        };

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer: drain the outbound queue into the socket. Exits when the
        // channel is dropped or the sink errors; either way the sender
        // closes and `is_live` turns false.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    debug!(error = %e, "websocket write failed — writer stopping");
                    break;
                }
            }
        });

        // Reader: forward text frames, swallow control frames, report the
        // close. A failed event send means the connection task is gone —
        // post-teardown events are inert by construction.
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if ev_tx.send(TransportEvent::Inbound(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                    _ => {}
                }
            }
            let _ = ev_tx.send(TransportEvent::Closed);
        });

        Ok(Channel {
            outbound: out_tx,
            events: ev_rx,
        })
    }
}
