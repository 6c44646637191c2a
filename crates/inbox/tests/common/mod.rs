//! Scripted sources and an in-memory transport for the feed tests.
//!
//! Every `list` call is handed to the test as a pending request carrying a
//! oneshot responder, so the test decides when (and whether) each pull
//! completes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, oneshot};

use servicedesk_core::records::{MessageRecord, NotificationRecord};
use servicedesk_core::types::DbId;
use servicedesk_inbox::{InboxError, MessageSource, NotificationFilter, NotificationSource};
use servicedesk_realtime::transport::{Outbound, TransportError};
use servicedesk_realtime::{Socket, SocketEvent, Transport};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub fn note(id: DbId, minute: u32, is_read: bool) -> NotificationRecord {
    NotificationRecord {
        id,
        subject: format!("subject {id}"),
        message: format!("message {id}"),
        is_read,
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap(),
        ticket_id: Some(100 + id),
        task_id: None,
    }
}

pub fn msg(id: &str, conversation: &str, second: u32) -> MessageRecord {
    MessageRecord {
        message_id: id.to_string(),
        conversation_id: conversation.to_string(),
        sender: "customer".into(),
        sender_role: "customer".into(),
        body: format!("body {id}"),
        attachments: Vec::new(),
        reactions: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, second).unwrap(),
        edited_at: None,
        is_edited: false,
    }
}

fn dropped() -> InboxError {
    InboxError::Api {
        status: 599,
        body: "responder dropped".into(),
    }
}

fn forbidden() -> InboxError {
    InboxError::Api {
        status: 403,
        body: "forbidden".into(),
    }
}

// ---------------------------------------------------------------------------
// Notification source
// ---------------------------------------------------------------------------

pub struct NotificationPull {
    pub filter: NotificationFilter,
    pub respond: oneshot::Sender<Result<Vec<NotificationRecord>, InboxError>>,
}

pub struct ScriptedNotifications {
    pulls: mpsc::UnboundedSender<NotificationPull>,
    reject_marks: AtomicBool,
    marked: Mutex<Vec<DbId>>,
}

impl ScriptedNotifications {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationPull>) {
        let (pulls, rx) = mpsc::unbounded_channel();
        let source = Self {
            pulls,
            reject_marks: AtomicBool::new(false),
            marked: Mutex::new(Vec::new()),
        };
        (source, rx)
    }

    /// Make every mark-read call fail with 403.
    pub fn reject_marks(&self) {
        self.reject_marks.store(true, Ordering::SeqCst);
    }

    pub fn marked(&self) -> Vec<DbId> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSource for ScriptedNotifications {
    async fn list(&self, filter: NotificationFilter) -> Result<Vec<NotificationRecord>, InboxError> {
        let (respond, response) = oneshot::channel();
        let _ = self.pulls.send(NotificationPull { filter, respond });
        response.await.unwrap_or_else(|_| Err(dropped()))
    }

    async fn mark_read(&self, notification_id: DbId) -> Result<(), InboxError> {
        if self.reject_marks.load(Ordering::SeqCst) {
            return Err(forbidden());
        }
        self.marked.lock().unwrap().push(notification_id);
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), InboxError> {
        if self.reject_marks.load(Ordering::SeqCst) {
            return Err(forbidden());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Message source
// ---------------------------------------------------------------------------

pub struct MessagePull {
    pub conversation_id: String,
    pub respond: oneshot::Sender<Result<Vec<MessageRecord>, InboxError>>,
}

pub struct ScriptedMessages {
    pulls: mpsc::UnboundedSender<MessagePull>,
}

impl ScriptedMessages {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MessagePull>) {
        let (pulls, rx) = mpsc::unbounded_channel();
        (Self { pulls }, rx)
    }
}

#[async_trait]
impl MessageSource for ScriptedMessages {
    async fn list(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, InboxError> {
        let (respond, response) = oneshot::channel();
        let _ = self.pulls.send(MessagePull {
            conversation_id: conversation_id.to_string(),
            respond,
        });
        response.await.unwrap_or_else(|_| Err(dropped()))
    }

    /// Echoes the posted body back as a stored message at 09:00:59.
    async fn post(&self, conversation_id: &str, body: &str) -> Result<MessageRecord, InboxError> {
        let mut message = msg("posted", conversation_id, 59);
        message.body = body.to_string();
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct ServerEnd {
    pub url: String,
    pub to_client: mpsc::UnboundedSender<SocketEvent>,
    pub from_client: mpsc::UnboundedReceiver<Outbound>,
}

pub struct LoopbackTransport {
    opened: mpsc::UnboundedSender<ServerEnd>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (opened, rx) = mpsc::unbounded_channel();
        (Self { opened }, rx)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, url: &str) -> Result<Socket, TransportError> {
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

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
