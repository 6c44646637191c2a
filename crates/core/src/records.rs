//! Notification and conversation message records.
//!
//! The same JSON shapes arrive from two places: REST list endpoints (pull)
//! and `notification_update` / `message_update` socket frames (push). Both
//! deserialize into the types below, so the stores can merge them with a
//! single function keyed by record identity.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

/// A single user notification.
///
/// Never deleted client-side; the only mutation after creation is the
/// `is_read` flag flipping to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: DbId,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: Timestamp,
    /// Ticket the notification refers to, if any.
    #[serde(default)]
    pub ticket_id: Option<DbId>,
    /// Task the notification refers to, if any.
    #[serde(default)]
    pub task_id: Option<DbId>,
}

/// A file attached to a conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub id: DbId,
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// An emoji reaction and the users who left it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    #[serde(default)]
    pub users: Vec<String>,
}

/// A message in a ticket conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned identifier; the merge key.
    pub message_id: String,
    pub conversation_id: String,
    pub sender: String,
    #[serde(default)]
    pub sender_role: String,
    #[serde(alias = "content")]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub edited_at: Option<Timestamp>,
    #[serde(default)]
    pub is_edited: bool,
}

impl MessageRecord {
    /// Sort key for the visible log: creation time, then id for stable ties.
    pub fn ordering_key(&self) -> (Timestamp, &str) {
        (self.created_at, self.message_id.as_str())
    }

    /// Timestamp of the latest content revision.
    pub fn revision(&self) -> Timestamp {
        self.edited_at.unwrap_or(self.created_at)
    }
}
