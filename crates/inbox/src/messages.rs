//! Per-conversation message log.
//!
//! [`MessageStore`] keeps the messages of the selected conversation in a
//! [`RecordSet`] keyed by `message_id` and mirrors them into a log sorted by
//! `(created_at, message_id)`, rebuilt after every mutation.
//! [`MessageFeed`] pulls from a [`MessageSource`], posts new messages and
//! routes `message_update` frames.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use servicedesk_core::records::MessageRecord;
use servicedesk_realtime::{Frame, FrameKind, FrameRouter, UpdateAction};
use tokio_util::sync::CancellationToken;

use crate::error::InboxError;
use crate::reconcile::{Keyed, Merge, PullScope, PullTicket, RecordSet};

impl Keyed for MessageRecord {
    type Key = String;

    fn key(&self) -> String {
        self.message_id.clone()
    }
}

impl Merge for MessageRecord {
    /// Last writer wins on revision; on a tie the incoming version wins.
    fn merge(existing: &Self, incoming: Self) -> Self {
        if incoming.revision() >= existing.revision() {
            incoming
        } else {
            existing.clone()
        }
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn list(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, InboxError>;
    async fn post(&self, conversation_id: &str, body: &str) -> Result<MessageRecord, InboxError>;
}

#[derive(Debug, Default)]
pub struct MessageStore {
    conversation_id: Option<String>,
    records: RecordSet<MessageRecord>,
    log: Vec<MessageRecord>,
    error: Option<String>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Select another conversation. Clears the log and invalidates any pull
    /// in flight. Returns `false` if `conversation_id` is already selected.
    pub fn switch_conversation(&mut self, conversation_id: Option<String>) -> bool {
        if self.conversation_id == conversation_id {
            return false;
        }
        self.conversation_id = conversation_id;
        self.records.clear();
        self.log.clear();
        self.error = None;
        true
    }

    pub fn begin_pull(&mut self) -> PullTicket {
        self.records.begin_pull()
    }

    /// Merge the full conversation history. Messages missing from the
    /// response are dropped unless pushed while the pull was in flight.
    pub fn complete_pull(&mut self, ticket: PullTicket, messages: Vec<MessageRecord>) -> bool {
        let current = self.conversation_id.clone();
        let messages = messages
            .into_iter()
            .filter(|m| Some(&m.conversation_id) == current.as_ref())
            .collect();
        if !self.records.complete_pull(ticket, messages, PullScope::Authoritative) {
            return false;
        }
        self.error = None;
        self.rebuild_log();
        true
    }

    pub fn fail_pull(&mut self, ticket: PullTicket, error: &InboxError) -> bool {
        if !self.records.abandon_pull(ticket) {
            return false;
        }
        tracing::warn!(error = %error, "Message pull failed");
        self.error = Some(error.to_string());
        true
    }

    /// Apply a created or edited message. Messages for other conversations
    /// are ignored.
    pub fn apply_push(&mut self, message: MessageRecord) -> bool {
        if !self.owns(&message) {
            tracing::debug!(
                message_id = %message.message_id,
                conversation_id = %message.conversation_id,
                "Ignoring message for another conversation"
            );
            return false;
        }
        let applied = self.records.upsert(message);
        if applied {
            self.rebuild_log();
        }
        applied
    }

    pub fn apply_delete(&mut self, message: &MessageRecord) -> bool {
        if !self.owns(message) {
            return false;
        }
        let removed = self.records.remove(&message.message_id).is_some();
        self.rebuild_log();
        removed
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The log, ascending by `(created_at, message_id)`.
    pub fn log(&self) -> &[MessageRecord] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    fn owns(&self, message: &MessageRecord) -> bool {
        self.conversation_id.as_deref() == Some(message.conversation_id.as_str())
    }

    fn rebuild_log(&mut self) {
        self.log = self.records.values().cloned().collect();
        self.log.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
    }
}

/// Frame handlers for a conversation channel.
pub fn message_router() -> FrameRouter<MessageStore> {
    FrameRouter::new()
        .on(FrameKind::MessageUpdate, |store: &mut MessageStore, frame| {
            if let Frame::MessageUpdate { message, action } = frame {
                match action {
                    UpdateAction::Deleted => {
                        store.apply_delete(message);
                    }
                    _ => {
                        store.apply_push(message.clone());
                    }
                }
            }
        })
        .on(FrameKind::Error, |store: &mut MessageStore, frame| {
            if let Frame::Error { message } = frame {
                tracing::warn!(error = %message, "Conversation channel reported an error");
                store.set_error(message.clone());
            }
        })
}

pub struct MessageFeed {
    store: Mutex<MessageStore>,
    source: Arc<dyn MessageSource>,
    router: FrameRouter<MessageStore>,
    pull_cancel: Mutex<CancellationToken>,
}

impl MessageFeed {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self {
            store: Mutex::new(MessageStore::new()),
            source,
            router: message_router(),
            pull_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Select a conversation, cancelling the pull for the previous one.
    pub fn switch_conversation(&self, conversation_id: Option<String>) {
        lock(&self.pull_cancel).cancel();
        let mut store = self.store();
        if store.switch_conversation(conversation_id) {
            tracing::info!(
                conversation_id = ?store.conversation_id(),
                "Message feed switched conversation"
            );
        }
    }

    /// Pull the selected conversation's history. `Ok(false)` means the pull
    /// was superseded by a newer pull or a conversation switch.
    pub async fn refresh(&self) -> Result<bool, InboxError> {
        let cancel = self.next_pull_token();
        let (ticket, conversation_id) = {
            let mut store = self.store();
            let Some(conversation_id) = store.conversation_id().map(str::to_string) else {
                return Err(InboxError::NoIdentity("conversation"));
            };
            (store.begin_pull(), conversation_id)
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            result = self.source.list(&conversation_id) => result,
        };

        let mut store = self.store();
        match result {
            Ok(messages) => Ok(store.complete_pull(ticket, messages)),
            Err(e) if store.fail_pull(ticket, &e) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Post a message to the selected conversation and add the server's
    /// copy to the log.
    pub async fn post(&self, body: &str) -> Result<MessageRecord, InboxError> {
        let conversation_id = self
            .store()
            .conversation_id()
            .map(str::to_string)
            .ok_or(InboxError::NoIdentity("conversation"))?;

        let message = self.source.post(&conversation_id, body).await?;
        self.store().apply_push(message.clone());
        Ok(message)
    }

    pub fn apply_frame(&self, frame: &Frame) -> bool {
        let mut store = self.store();
        self.router.dispatch(&mut store, frame)
    }

    /// Snapshot of the sorted log.
    pub fn log(&self) -> Vec<MessageRecord> {
        self.store().log().to_vec()
    }

    pub fn error(&self) -> Option<String> {
        self.store().error().map(str::to_string)
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.store().conversation_id().map(str::to_string)
    }

    fn store(&self) -> MutexGuard<'_, MessageStore> {
        lock(&self.store)
    }

    fn next_pull_token(&self) -> CancellationToken {
        let mut current = lock(&self.pull_cancel);
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
