//! In-memory transport shared by the connection manager tests.
//!
//! Every successful `open` hands the test a [`ServerEnd`] through the
//! receiver returned by [`MockTransport::new`], so the test plays the
//! server: it pushes [`SocketEvent`]s and reads what the client wrote.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use servicedesk_realtime::transport::{Outbound, TransportError};
use servicedesk_realtime::{ChannelEvent, ConnectionState, Socket, SocketEvent, Transport};

pub struct ServerEnd {
    pub url: String,
    pub to_client: mpsc::UnboundedSender<SocketEvent>,
    pub from_client: mpsc::UnboundedReceiver<Outbound>,
}

pub struct MockTransport {
    opened: mpsc::UnboundedSender<ServerEnd>,
    refusals: AtomicU32,
    attempts: Arc<AtomicU32>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (opened, rx) = mpsc::unbounded_channel();
        let transport = Self {
            opened,
            refusals: AtomicU32::new(0),
            attempts: Arc::new(AtomicU32::new(0)),
        };
        (transport, rx)
    }

    /// Refuse the next `count` open attempts.
    pub fn refuse_next(&self, count: u32) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// Shared counter of every open attempt, successful or not.
    pub fn attempts(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &str) -> Result<Socket, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.opened.send(ServerEnd {
            url: url.to_string(),
            to_client,
            from_client,
        });
        Ok(Socket { outbound, inbound })
    }
}

/// Wait for the next state change, skipping frames and errors.
pub async fn next_state(events: &mut broadcast::Receiver<ChannelEvent>) -> ConnectionState {
    loop {
        match events.recv().await.expect("event stream closed") {
            ChannelEvent::StateChanged(state) => return state,
            _ => continue,
        }
    }
}

/// Wait for the next parsed frame, skipping state changes and errors.
pub async fn next_frame(
    events: &mut broadcast::Receiver<ChannelEvent>,
) -> servicedesk_realtime::Frame {
    loop {
        match events.recv().await.expect("event stream closed") {
            ChannelEvent::Frame(frame) => return frame,
            _ => continue,
        }
    }
}
