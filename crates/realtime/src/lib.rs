//! Persistent socket channels for notification and conversation delivery.
//!
//! Provides the channel endpoint description, the typed [`Frame`] codec,
//! a tag-based [`FrameRouter`], the [`Transport`] seam with a
//! tokio-tungstenite implementation, and the reconnecting
//! [`ConnectionManager`].

pub mod endpoint;
pub mod events;
pub mod frames;
pub mod manager;
pub mod router;
pub mod transport;

pub use endpoint::ChannelEndpoint;
pub use events::{ChannelEvent, ConnectionState};
pub use frames::{parse_frame, Frame, FrameKind, UpdateAction};
pub use manager::{ConnectionConfig, ConnectionManager, RealtimeError};
pub use router::FrameRouter;
pub use transport::{Socket, SocketEvent, Transport, TungsteniteTransport};
