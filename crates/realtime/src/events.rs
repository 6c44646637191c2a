//! Observable channel state and events.

use serde::Serialize;

use crate::frames::Frame;

/// Lifecycle of one channel. Owned and mutated by the connection driver
/// only; everyone else observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket and no reconnect pending. Initial state.
    Disconnected,
    /// A socket open is in progress.
    Connecting,
    /// The socket is open; keepalive is running.
    Connected,
    /// The socket dropped; a reconnect may be pending.
    Reconnecting,
    /// The reconnect budget is spent. Only an explicit connect leaves this.
    Closed,
}

/// Emitted on the manager's broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    /// A parsed inbound frame, in transport delivery order.
    Frame(Frame),
    /// A transport error, or the terminal give-up error.
    Error(String),
}
