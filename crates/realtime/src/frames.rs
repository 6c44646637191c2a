//! Socket frame types and parser.
//!
//! Every frame on the notification and conversation channels is a JSON
//! object with a `"type"` tag and the payload fields inline, e.g.
//! `{"type": "count_update", "unread_count": 3}`. Known tags deserialize
//! into the matching [`Frame`] variant; unrecognised tags become
//! [`Frame::Unknown`] so a newer server cannot crash an older client.

use serde::{Deserialize, Serialize};
use servicedesk_core::records::{MessageRecord, NotificationRecord};
use servicedesk_core::types::DbId;

/// All frames exchanged over a channel, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Keepalive sent by the client every keepalive interval.
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// Server reply to a ping.
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// Sent by the server once the channel is authenticated.
    ConnectionEstablished {
        #[serde(default)]
        message: Option<String>,
    },

    /// Acknowledges a subscription to a conversation or topic.
    Subscribed {
        #[serde(default)]
        channel: Option<String>,
    },

    /// A notification was created or its read flag changed.
    NotificationUpdate {
        notification: NotificationRecord,
        #[serde(default)]
        action: UpdateAction,
    },

    /// Authoritative unread counter for the user.
    CountUpdate { unread_count: u64 },

    /// Client request to mark one notification read.
    MarkRead { notification_id: DbId },

    /// A conversation message was created, edited, reacted to or deleted.
    MessageUpdate {
        message: MessageRecord,
        #[serde(default)]
        action: UpdateAction,
    },

    /// Server-side error report. Informational; the channel stays open.
    Error {
        #[serde(default)]
        message: String,
    },

    /// Any tag this client does not know.
    #[serde(other)]
    Unknown,
}

/// What happened to the record carried by an update frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    #[default]
    Created,
    Updated,
    Deleted,
    #[serde(other)]
    Other,
}

/// Frame tag without payload, used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Ping,
    Pong,
    ConnectionEstablished,
    Subscribed,
    NotificationUpdate,
    CountUpdate,
    MarkRead,
    MessageUpdate,
    Error,
    Unknown,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Ping { .. } => FrameKind::Ping,
            Frame::Pong { .. } => FrameKind::Pong,
            Frame::ConnectionEstablished { .. } => FrameKind::ConnectionEstablished,
            Frame::Subscribed { .. } => FrameKind::Subscribed,
            Frame::NotificationUpdate { .. } => FrameKind::NotificationUpdate,
            Frame::CountUpdate { .. } => FrameKind::CountUpdate,
            Frame::MarkRead { .. } => FrameKind::MarkRead,
            Frame::MessageUpdate { .. } => FrameKind::MessageUpdate,
            Frame::Error { .. } => FrameKind::Error,
            Frame::Unknown => FrameKind::Unknown,
        }
    }

    /// A keepalive ping stamped with the current time (epoch millis).
    pub fn ping_now() -> Self {
        Frame::Ping {
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn mark_read(notification_id: DbId) -> Self {
        Frame::MarkRead { notification_id }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse a text frame into a typed [`Frame`].
///
/// Returns `Err` for malformed JSON, a missing `"type"` tag, or a known tag
/// whose payload does not match. Callers should log and drop such frames.
pub fn parse_frame(text: &str) -> Result<Frame, serde_json::Error> {
    serde_json::from_str(text)
}
