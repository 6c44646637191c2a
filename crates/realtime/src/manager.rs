//! Reconnecting socket channel manager.
//!
//! [`ConnectionManager`] owns one logical channel (a user's notification
//! feed, one ticket conversation). A single driver task holds every piece
//! of mutable state: the socket, the [`ReconnectPolicy`], the keepalive
//! [`Ticker`] and the reconnect [`Timer`]. Callers talk to it through a
//! command channel, so state changes happen in one place and in order.
//!
//! State changes, parsed frames and errors are broadcast as
//! [`ChannelEvent`]s. Call [`ConnectionManager::subscribe`] to receive them
//! or [`ConnectionManager::watch_state`] to follow the current state only.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use servicedesk_core::backoff::ReconnectPolicy;
use servicedesk_core::error::CoreError;
use servicedesk_core::timer::{Ticker, Timer};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::endpoint::ChannelEndpoint;
use crate::events::{ChannelEvent, ConnectionState};
use crate::frames::{parse_frame, Frame};
use crate::transport::{Outbound, Socket, SocketEvent, Transport, ABNORMAL_CLOSURE, NORMAL_CLOSURE};

/// Broadcast channel capacity for channel events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Interval between keepalive pings while connected.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long [`ConnectionManager::shutdown`] waits for the driver to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-channel tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub reconnect: ReconnectPolicy,
    pub keepalive_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }
}

enum Command {
    Connect(String),
    Disconnect,
    Send(Frame, oneshot::Sender<Result<(), RealtimeError>>),
}

/// Handle on one reconnecting channel.
///
/// Dropping the handle stops the driver task and closes the socket.
pub struct ConnectionManager {
    label: String,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    error_rx: watch::Receiver<Option<String>>,
    event_tx: broadcast::Sender<ChannelEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Spawn the driver task for a channel. Starts `Disconnected`.
    ///
    /// `label` only appears in logs (e.g. `"notifications"`).
    pub fn new(
        label: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
    ) -> Self {
        let label = label.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (error_tx, error_rx) = watch::channel(None);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let driver = Driver {
            label: label.clone(),
            transport,
            policy: config.reconnect,
            keepalive_interval: config.keepalive_interval,
            url: None,
            socket: None,
            keepalive: Ticker::new(),
            reconnect: Timer::new(),
            state_tx,
            error_tx,
            event_tx: event_tx.clone(),
        };
        let task = tokio::spawn(driver.run(command_rx, cancel.clone()));

        Self {
            label,
            commands,
            state_rx,
            error_rx,
            event_tx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Open the channel, closing any socket that is already open.
    ///
    /// Fails only when the endpoint cannot be rendered to a URL; the
    /// connection outcome is reported through state and events.
    pub fn connect(&self, endpoint: &ChannelEndpoint) -> Result<(), RealtimeError> {
        let url = endpoint.url()?;
        self.command(Command::Connect(url))
    }

    /// Close the channel with a normal closure. No reconnect follows.
    pub fn disconnect(&self) -> Result<(), RealtimeError> {
        self.command(Command::Disconnect)
    }

    /// Send a frame on the open socket.
    ///
    /// Frames are not queued: sending while not `Connected` fails with
    /// [`RealtimeError::NotConnected`].
    pub async fn send(&self, frame: Frame) -> Result<(), RealtimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Send(frame, reply_tx))?;
        reply_rx.await.map_err(|_| RealtimeError::DriverStopped)?
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Most recent transport error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.error_rx.borrow().clone()
    }

    /// Subscribe to state changes, frames and errors.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the driver: cancel all timers and close the socket.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await;
        }
        tracing::info!(channel = %self.label, "Connection manager shut down");
    }

    fn command(&self, command: Command) -> Result<(), RealtimeError> {
        self.commands
            .send(command)
            .map_err(|_| RealtimeError::DriverStopped)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The task that owns the channel's mutable state.
struct Driver {
    label: String,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    keepalive_interval: Duration,
    url: Option<String>,
    socket: Option<Socket>,
    keepalive: Ticker,
    reconnect: Timer,
    state_tx: watch::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<String>>,
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &cancel).await,
                    None => break,
                },
                event = next_socket_event(&mut self.socket) => self.handle_socket_event(event),
                _ = self.reconnect.fired() => self.open(&cancel).await,
                _ = self.keepalive.tick() => self.send_ping(),
            }
        }

        self.reconnect.cancel();
        self.close_socket("shutdown");
        if self.current_state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Disconnected);
        }
        tracing::debug!(channel = %self.label, "Connection driver exited");
    }

    async fn handle_command(&mut self, command: Command, cancel: &CancellationToken) {
        match command {
            Command::Connect(url) => {
                // Supersede: no stale timer or socket may outlive this call.
                self.reconnect.cancel();
                self.close_socket("reconnecting with new endpoint");
                self.policy.reset();
                self.url = Some(url);
                self.open(cancel).await;
            }
            Command::Disconnect => {
                self.reconnect.cancel();
                self.close_socket("client disconnect");
                self.url = None;
                self.set_state(ConnectionState::Disconnected);
                tracing::info!(channel = %self.label, "Disconnected");
            }
            Command::Send(frame, reply) => {
                let _ = reply.send(self.send_frame(&frame));
            }
        }
    }

    async fn open(&mut self, cancel: &CancellationToken) {
        let Some(url) = self.url.clone() else {
            return;
        };

        self.set_state(ConnectionState::Connecting);
        tracing::info!(
            channel = %self.label,
            attempt = self.policy.attempts(),
            "Opening socket",
        );

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.transport.open(&url) => result,
        };

        match result {
            Ok(socket) => {
                self.socket = Some(socket);
                self.policy.reset();
                self.set_state(ConnectionState::Connected);
                if let Err(e) = self.keepalive.start(self.keepalive_interval) {
                    tracing::warn!(channel = %self.label, error = %e, "Keepalive disabled");
                }
                tracing::info!(channel = %self.label, "Connected");
            }
            Err(e) => {
                tracing::warn!(channel = %self.label, error = %e, "Socket open failed");
                self.record_error(e.to_string());
                self.handle_close(ABNORMAL_CLOSURE, &e.to_string());
            }
        }
    }

    fn handle_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Text(text) => self.handle_text(&text),
            SocketEvent::Error(message) => {
                tracing::warn!(channel = %self.label, error = %message, "Socket error");
                self.record_error(message);
            }
            SocketEvent::Closed { code, reason } => {
                self.socket = None;
                self.handle_close(code, &reason);
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    channel = %self.label,
                    error = %e,
                    raw_frame = %text,
                    "Failed to parse frame",
                );
                return;
            }
        };

        match frame {
            Frame::Unknown => {
                tracing::debug!(channel = %self.label, raw_frame = %text, "Ignoring unknown frame type");
            }
            Frame::Ping { timestamp } => {
                if let Err(e) = self.send_frame(&Frame::Pong { timestamp }) {
                    tracing::debug!(channel = %self.label, error = %e, "Failed to answer ping");
                }
                let _ = self.event_tx.send(ChannelEvent::Frame(Frame::Ping { timestamp }));
            }
            frame => {
                let _ = self.event_tx.send(ChannelEvent::Frame(frame));
            }
        }
    }

    fn handle_close(&mut self, code: u16, reason: &str) {
        self.keepalive.stop();

        if code == NORMAL_CLOSURE {
            tracing::info!(channel = %self.label, reason, "Socket closed normally");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.set_state(ConnectionState::Reconnecting);
        match self.policy.next_delay() {
            Some(delay) => {
                tracing::info!(
                    channel = %self.label,
                    code,
                    attempt = self.policy.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Socket lost, scheduling reconnect",
                );
                self.reconnect.arm(delay);
            }
            None => {
                let message = format!(
                    "Gave up after {} reconnect attempts",
                    self.policy.max_attempts
                );
                tracing::error!(channel = %self.label, code, "{message}");
                self.set_state(ConnectionState::Closed);
                self.record_error(message);
            }
        }
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), RealtimeError> {
        if self.current_state() != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected);
        }
        let socket = self.socket.as_ref().ok_or(RealtimeError::NotConnected)?;
        let text = frame.to_text()?;
        socket
            .outbound
            .send(Outbound::Text(text))
            .map_err(|_| RealtimeError::NotConnected)
    }

    fn send_ping(&mut self) {
        if let Err(e) = self.send_frame(&Frame::ping_now()) {
            tracing::debug!(channel = %self.label, error = %e, "Keepalive ping not sent");
        }
    }

    fn close_socket(&mut self, reason: &str) {
        self.keepalive.stop();
        if let Some(socket) = self.socket.take() {
            let _ = socket.outbound.send(Outbound::Close {
                code: NORMAL_CLOSURE,
                reason: reason.to_string(),
            });
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        if self.current_state() == state {
            return;
        }
        self.state_tx.send_replace(state);
        tracing::debug!(channel = %self.label, ?state, "Connection state changed");
        let _ = self.event_tx.send(ChannelEvent::StateChanged(state));
    }

    fn record_error(&self, message: String) {
        self.error_tx.send_replace(Some(message.clone()));
        let _ = self.event_tx.send(ChannelEvent::Error(message));
    }
}

/// Next event from the open socket; pends forever when there is none.
///
/// A transport that vanishes without a close event counts as an abnormal
/// closure.
async fn next_socket_event(socket: &mut Option<Socket>) -> SocketEvent {
    match socket {
        Some(socket) => socket.inbound.recv().await.unwrap_or(SocketEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: "transport dropped".into(),
        }),
        None => std::future::pending().await,
    }
}

/// Errors returned by [`ConnectionManager`] calls.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// The endpoint could not be rendered to a URL.
    #[error(transparent)]
    Endpoint(#[from] CoreError),

    /// The channel is not in the `Connected` state.
    #[error("Channel is not connected")]
    NotConnected,

    /// The frame could not be serialized.
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// The driver task has exited (shutdown or drop).
    #[error("Connection driver has stopped")]
    DriverStopped,
}
