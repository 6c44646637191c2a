//! Glue between a [`ConnectionManager`] and a feed.
//!
//! [`attach_channel`] subscribes to the manager's event stream and feeds
//! every parsed frame into a [`ChannelSink`]. Whenever the channel
//! (re)connects, or the subscriber lagged and may have missed frames, the
//! sink is asked to resync over REST so push and pull converge again.
//! [`FrameSender`] is the outbound direction: feeds that announce local
//! changes on the socket hold one.

use std::sync::Arc;

use async_trait::async_trait;
use servicedesk_realtime::{ChannelEvent, ConnectionManager, ConnectionState, Frame, RealtimeError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::messages::MessageFeed;
use crate::notifications::{NotificationFeed, NotificationFilter};

/// Something frames can be sent on.
#[async_trait]
pub trait FrameSender: Send + Sync + 'static {
    async fn send_frame(&self, frame: Frame) -> Result<(), RealtimeError>;
}

#[async_trait]
impl FrameSender for ConnectionManager {
    async fn send_frame(&self, frame: Frame) -> Result<(), RealtimeError> {
        self.send(frame).await
    }
}

/// Something a channel can deliver frames to.
#[async_trait]
pub trait ChannelSink: Send + Sync + 'static {
    /// Apply one frame. Returns whether any handler took it.
    fn apply_frame(&self, frame: &Frame) -> bool;

    /// Re-pull server state after a gap in delivery.
    async fn resync(&self);
}

#[async_trait]
impl ChannelSink for NotificationFeed {
    fn apply_frame(&self, frame: &Frame) -> bool {
        NotificationFeed::apply_frame(self, frame)
    }

    async fn resync(&self) {
        if let Err(e) = self.refresh(NotificationFilter::All).await {
            tracing::warn!(error = %e, "Notification resync failed");
        }
    }
}

#[async_trait]
impl ChannelSink for MessageFeed {
    fn apply_frame(&self, frame: &Frame) -> bool {
        MessageFeed::apply_frame(self, frame)
    }

    async fn resync(&self) {
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Message resync failed");
        }
    }
}

/// Pump `manager`'s events into `sink` until `cancel` fires or the
/// manager goes away.
pub fn attach_channel(
    manager: &ConnectionManager,
    sink: Arc<dyn ChannelSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = manager.subscribe();
    let channel = manager.label().to_string();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ChannelEvent::Frame(frame)) => {
                    if !sink.apply_frame(&frame) {
                        tracing::trace!(channel = %channel, kind = ?frame.kind(), "Frame not handled");
                    }
                }
                Ok(ChannelEvent::StateChanged(ConnectionState::Connected)) => {
                    tracing::debug!(channel = %channel, "Channel connected, resyncing");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sink.resync() => {}
                    }
                }
                Ok(ChannelEvent::StateChanged(_)) => {}
                Ok(ChannelEvent::Error(message)) => {
                    tracing::debug!(channel = %channel, error = %message, "Channel error");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %channel, skipped, "Channel subscriber lagged, resyncing");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sink.resync() => {}
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!(channel = %channel, "Channel pump stopped");
    })
}
