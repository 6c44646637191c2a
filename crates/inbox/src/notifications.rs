//! Per-user notification store and its async feed.
//!
//! [`NotificationStore`] is plain state: a [`RecordSet`] of notifications,
//! an overlay of optimistic mark-read requests, the server-reported unread
//! counter and the last error. [`NotificationFeed`] drives it: pulls from
//! a [`NotificationSource`], applies socket frames, and performs
//! mark-read / mark-all-read round trips. When a channel is attached with
//! [`NotificationFeed::set_channel`], mark-read is also announced on the
//! socket as a `mark_read` frame.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use servicedesk_core::records::NotificationRecord;
use servicedesk_core::types::DbId;
use servicedesk_realtime::{Frame, FrameKind, FrameRouter, UpdateAction};
use tokio_util::sync::CancellationToken;

use crate::channels::FrameSender;
use crate::error::InboxError;
use crate::reconcile::{Keyed, Merge, PullScope, PullTicket, RecordSet};

impl Keyed for NotificationRecord {
    type Key = DbId;

    fn key(&self) -> DbId {
        self.id
    }
}

impl Merge for NotificationRecord {
    /// Incoming fields win, except that a read flag never turns back off.
    fn merge(existing: &Self, incoming: Self) -> Self {
        NotificationRecord {
            is_read: existing.is_read || incoming.is_read,
            ..incoming
        }
    }
}

/// Which category of notifications to list or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationFilter {
    All,
    Unread,
    Read,
}

/// Pull side of the notification REST surface.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn list(&self, filter: NotificationFilter) -> Result<Vec<NotificationRecord>, InboxError>;
    async fn mark_read(&self, notification_id: DbId) -> Result<(), InboxError>;
    async fn mark_all_read(&self) -> Result<(), InboxError>;
}

#[derive(Debug, Default)]
pub struct NotificationStore {
    user_id: Option<DbId>,
    records: RecordSet<NotificationRecord>,
    pending_reads: HashSet<DbId>,
    reported_unread: Option<u64>,
    error: Option<String>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<DbId> {
        self.user_id
    }

    /// Switch to another user, discarding every record and invalidating
    /// any pull in flight. Returns `false` if `user_id` is already current.
    pub fn switch_user(&mut self, user_id: Option<DbId>) -> bool {
        if self.user_id == user_id {
            return false;
        }
        self.user_id = user_id;
        self.records.clear();
        self.pending_reads.clear();
        self.reported_unread = None;
        self.error = None;
        true
    }

    pub fn begin_pull(&mut self) -> PullTicket {
        self.records.begin_pull()
    }

    /// Merge a pulled page. Returns `false` for a stale ticket.
    pub fn complete_pull(&mut self, ticket: PullTicket, records: Vec<NotificationRecord>) -> bool {
        if !self.records.complete_pull(ticket, records, PullScope::Partial) {
            return false;
        }
        self.reported_unread = None;
        self.error = None;
        true
    }

    /// Record a failed pull, keeping the cached records. Returns `false`
    /// for a stale ticket.
    pub fn fail_pull(&mut self, ticket: PullTicket, error: &InboxError) -> bool {
        if !self.records.abandon_pull(ticket) {
            return false;
        }
        tracing::warn!(error = %error, "Notification pull failed");
        self.error = Some(error.to_string());
        true
    }

    /// Apply a pushed notification (new record or read-flag change).
    pub fn apply_push(&mut self, record: NotificationRecord) {
        if record.is_read {
            self.pending_reads.remove(&record.id);
        }
        self.records.upsert(record);
        self.reported_unread = None;
    }

    /// The server's unread counter; authoritative until the next local change.
    pub fn set_reported_unread(&mut self, count: u64) {
        self.reported_unread = Some(count);
    }

    /// Optimistically show `id` as read. Returns `false` if the record is
    /// unknown or already read.
    pub fn mark_read_optimistic(&mut self, id: DbId) -> bool {
        let unread = self.records.get(&id).is_some_and(|r| !r.is_read);
        if unread && self.pending_reads.insert(id) {
            self.reported_unread = None;
            return true;
        }
        false
    }

    /// Optimistically show every held notification as read. Returns the
    /// ids that changed.
    pub fn mark_all_read_optimistic(&mut self) -> Vec<DbId> {
        let ids: Vec<DbId> = self
            .records
            .values()
            .filter(|r| !r.is_read && !self.pending_reads.contains(&r.id))
            .map(|r| r.id)
            .collect();
        self.pending_reads.extend(ids.iter().copied());
        if !ids.is_empty() {
            self.reported_unread = None;
        }
        ids
    }

    /// The server accepted a mark-read: make it server truth.
    pub fn confirm_read(&mut self, id: DbId) {
        self.pending_reads.remove(&id);
        self.records.update(&id, |r| r.is_read = true);
    }

    /// The server rejected a mark-read: roll the overlay back.
    pub fn reject_read(&mut self, id: DbId, error: &InboxError) {
        if self.pending_reads.remove(&id) {
            self.reported_unread = None;
        }
        self.error = Some(error.to_string());
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether `id` currently shows as read (server truth or optimistic).
    pub fn is_read(&self, id: DbId) -> Option<bool> {
        self.records
            .get(&id)
            .map(|r| r.is_read || self.pending_reads.contains(&id))
    }

    /// Notifications in `filter`, newest first, optimistic reads applied.
    pub fn list(&self, filter: NotificationFilter) -> Vec<NotificationRecord> {
        let mut list: Vec<NotificationRecord> = self
            .records
            .values()
            .map(|r| {
                let mut r = r.clone();
                r.is_read = r.is_read || self.pending_reads.contains(&r.id);
                r
            })
            .filter(|r| match filter {
                NotificationFilter::All => true,
                NotificationFilter::Unread => !r.is_read,
                NotificationFilter::Read => r.is_read,
            })
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Unread count: the server-reported counter when it is newer than any
    /// local change, otherwise the number of unread notifications held.
    pub fn unread_count(&self) -> u64 {
        self.reported_unread.unwrap_or_else(|| {
            self.records
                .values()
                .filter(|r| !r.is_read && !self.pending_reads.contains(&r.id))
                .count() as u64
        })
    }
}

/// Frame handlers for the notification channel.
pub fn notification_router() -> FrameRouter<NotificationStore> {
    FrameRouter::new()
        .on(FrameKind::NotificationUpdate, |store: &mut NotificationStore, frame| {
            if let Frame::NotificationUpdate { notification, action } = frame {
                if *action == UpdateAction::Deleted {
                    tracing::debug!(id = notification.id, "Ignoring notification delete");
                    return;
                }
                store.apply_push(notification.clone());
            }
        })
        .on(FrameKind::CountUpdate, |store: &mut NotificationStore, frame| {
            if let Frame::CountUpdate { unread_count } = frame {
                store.set_reported_unread(*unread_count);
            }
        })
        .on(FrameKind::MarkRead, |store: &mut NotificationStore, frame| {
            if let Frame::MarkRead { notification_id } = frame {
                store.confirm_read(*notification_id);
            }
        })
        .on(FrameKind::Error, |store: &mut NotificationStore, frame| {
            if let Frame::Error { message } = frame {
                tracing::warn!(error = %message, "Notification channel reported an error");
                store.set_error(message.clone());
            }
        })
}

/// Async driver for a [`NotificationStore`].
///
/// Cheap to share behind an `Arc`. The store lock is never held across an
/// `.await`.
pub struct NotificationFeed {
    store: Mutex<NotificationStore>,
    source: Arc<dyn NotificationSource>,
    router: FrameRouter<NotificationStore>,
    pull_cancel: Mutex<CancellationToken>,
    channel: Mutex<Option<Arc<dyn FrameSender>>>,
}

impl NotificationFeed {
    pub fn new(source: Arc<dyn NotificationSource>) -> Self {
        Self {
            store: Mutex::new(NotificationStore::new()),
            source,
            router: notification_router(),
            pull_cancel: Mutex::new(CancellationToken::new()),
            channel: Mutex::new(None),
        }
    }

    /// Attach (or detach) the notification channel outbound frames go to.
    pub fn set_channel(&self, channel: Option<Arc<dyn FrameSender>>) {
        *lock(&self.channel) = channel;
    }

    /// Switch user: cancel the pull in flight, then drop the old records.
    /// Call [`refresh`](Self::refresh) afterwards to load the new user.
    pub fn switch_user(&self, user_id: Option<DbId>) {
        lock(&self.pull_cancel).cancel();
        if self.store().switch_user(user_id) {
            tracing::info!(?user_id, "Notification feed switched user");
        }
    }

    /// Pull `filter` from the source and merge it.
    ///
    /// Returns `Ok(false)` when the pull was superseded or cancelled. A
    /// source error is stored on the feed (cached records are kept) and
    /// returned.
    pub async fn refresh(&self, filter: NotificationFilter) -> Result<bool, InboxError> {
        let cancel = self.next_pull_token();
        let ticket = {
            let mut store = self.store();
            if store.user_id().is_none() {
                return Err(InboxError::NoIdentity("user"));
            }
            store.begin_pull()
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            result = self.source.list(filter) => result,
        };

        let mut store = self.store();
        match result {
            Ok(records) => Ok(store.complete_pull(ticket, records)),
            Err(e) if store.fail_pull(ticket, &e) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Mark one notification read: optimistic locally, announced on the
    /// channel, then confirmed or rolled back by the server over REST, then
    /// refreshed.
    pub async fn mark_read(&self, id: DbId) -> Result<(), InboxError> {
        let user = {
            let mut store = self.store();
            store.mark_read_optimistic(id);
            store.user_id()
        };

        let channel = lock(&self.channel).clone();
        if let Some(channel) = channel {
            if let Err(e) = channel.send_frame(Frame::mark_read(id)).await {
                tracing::debug!(notification_id = id, error = %e, "mark_read frame not sent");
            }
        }

        let outcome = self.source.mark_read(id).await;
        {
            let mut store = self.store();
            if store.user_id() != user {
                return Ok(());
            }
            match &outcome {
                Ok(()) => store.confirm_read(id),
                Err(e) => store.reject_read(id, e),
            }
        }

        if let Err(e) = self.refresh(NotificationFilter::All).await {
            tracing::debug!(error = %e, "Refresh after mark-read failed");
        }
        outcome
    }

    /// Mark every notification read, with the same optimistic protocol.
    pub async fn mark_all_read(&self) -> Result<(), InboxError> {
        let (user, ids) = {
            let mut store = self.store();
            let ids = store.mark_all_read_optimistic();
            (store.user_id(), ids)
        };

        let outcome = self.source.mark_all_read().await;
        {
            let mut store = self.store();
            if store.user_id() != user {
                return Ok(());
            }
            for id in ids {
                match &outcome {
                    Ok(()) => store.confirm_read(id),
                    Err(e) => store.reject_read(id, e),
                }
            }
        }

        if let Err(e) = self.refresh(NotificationFilter::All).await {
            tracing::debug!(error = %e, "Refresh after mark-all-read failed");
        }
        outcome
    }

    /// Route one channel frame into the store.
    pub fn apply_frame(&self, frame: &Frame) -> bool {
        let mut store = self.store();
        self.router.dispatch(&mut store, frame)
    }

    pub fn list(&self, filter: NotificationFilter) -> Vec<NotificationRecord> {
        self.store().list(filter)
    }

    pub fn unread_count(&self) -> u64 {
        self.store().unread_count()
    }

    pub fn error(&self) -> Option<String> {
        self.store().error().map(str::to_string)
    }

    pub fn user_id(&self) -> Option<DbId> {
        self.store().user_id()
    }

    fn store(&self) -> MutexGuard<'_, NotificationStore> {
        lock(&self.store)
    }

    /// Cancel the previous pull token and hand out a fresh one.
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
