//! Socket transport seam.
//!
//! The [`ConnectionManager`](crate::ConnectionManager) never touches a
//! WebSocket directly. It asks a [`Transport`] to open a URL and gets back
//! a [`Socket`]: an outbound command sender plus an inbound event
//! receiver. [`TungsteniteTransport`] backs this with tokio-tungstenite;
//! tests substitute an in-memory transport.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Close code for an intentional, clean disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when no close frame was received.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code for a connection lost without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Something the transport observed on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame.
    Text(String),
    /// A socket-level error. Does not by itself mean the socket closed.
    Error(String),
    /// The socket closed. Always the last event.
    Closed { code: u16, reason: String },
}

/// Something to write to an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// The client's handle on one open socket.
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens sockets. One call per connection attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Socket, TransportError>;
}

/// WebSocket transport over tokio-tungstenite.
///
/// Each open socket is served by two tasks: a writer draining
/// [`Outbound`] commands into the sink, and a reader forwarding frames as
/// [`SocketEvent`]s. Both stop once the client drops its [`Socket`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<Socket, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(format!("Failed to connect to {url}: {e}")))?;

        let (mut sink, mut stream) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SocketEvent>();

        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                let result = match command {
                    Outbound::Text(text) => sink.send(Message::Text(text)).await,
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "WebSocket send failed");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = inbound_tx.closed() => break,
                    next = stream.next() => next,
                };

                let event = match next {
                    Some(Ok(Message::Text(text))) => SocketEvent::Text(text),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                        let _ = inbound_tx.send(SocketEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, ping/pong and raw frames: tungstenite answers
                        // pings itself and the channels only speak text.
                        continue;
                    }
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(SocketEvent::Error(e.to_string()));
                        let _ = inbound_tx.send(SocketEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(SocketEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended".into(),
                        });
                        break;
                    }
                };

                if inbound_tx.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(Socket {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Errors raised while opening a socket.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish the connection (DNS, TCP, TLS, handshake).
    #[error("Connection error: {0}")]
    Connect(String),
}
