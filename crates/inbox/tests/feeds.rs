//! Feed-level tests: pull/push reconciliation, identity switches while a
//! pull is in flight, and the optimistic mark-read round trip.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use servicedesk_inbox::{InboxError, MessageFeed, NotificationFeed, NotificationFilter};
use servicedesk_realtime::{Frame, UpdateAction};

use common::{msg, note, ScriptedMessages, ScriptedNotifications};

fn message_ids(feed: &MessageFeed) -> Vec<String> {
    feed.log().into_iter().map(|m| m.message_id).collect()
}

fn notification_ids(feed: &NotificationFeed, filter: NotificationFilter) -> Vec<i64> {
    feed.list(filter).into_iter().map(|n| n.id).collect()
}

// ---------------------------------------------------------------------------
// Conversation switch while the previous pull is in flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_response_for_previous_conversation_is_discarded() {
    let (source, mut pulls) = ScriptedMessages::new();
    let feed = Arc::new(MessageFeed::new(Arc::new(source)));

    feed.switch_conversation(Some("T1".into()));
    let first = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.refresh().await })
    };
    let t1_pull = pulls.recv().await.unwrap();
    assert_eq!(t1_pull.conversation_id, "T1");

    feed.switch_conversation(Some("T2".into()));
    let second = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.refresh().await })
    };
    let t2_pull = pulls.recv().await.unwrap();
    assert_eq!(t2_pull.conversation_id, "T2");

    // T1's response shows up after the switch.
    let _ = t1_pull.respond.send(Ok(vec![msg("t1-a", "T1", 1)]));
    assert!(!first.await.unwrap().unwrap());

    t2_pull
        .respond
        .send(Ok(vec![msg("t2-b", "T2", 2), msg("t2-a", "T2", 1)]))
        .unwrap();
    assert!(second.await.unwrap().unwrap());

    assert_eq!(message_ids(&feed), vec!["t2-a", "t2-b"]);
    assert_eq!(feed.conversation_id().as_deref(), Some("T2"));
}

#[tokio::test]
async fn user_switch_discards_in_flight_notification_pull() {
    let (source, mut pulls) = ScriptedNotifications::new();
    let feed = Arc::new(NotificationFeed::new(Arc::new(source)));

    feed.switch_user(Some(1));
    let first = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.refresh(NotificationFilter::All).await })
    };
    let pull = pulls.recv().await.unwrap();

    feed.switch_user(Some(2));
    let _ = pull.respond.send(Ok(vec![note(1, 0, false)]));

    assert!(!first.await.unwrap().unwrap());
    assert!(feed.list(NotificationFilter::All).is_empty());
    assert_eq!(feed.user_id(), Some(2));
}

#[tokio::test]
async fn refresh_without_identity_is_an_error() {
    let (messages, _pulls) = ScriptedMessages::new();
    let feed = MessageFeed::new(Arc::new(messages));
    assert_matches!(feed.refresh().await, Err(InboxError::NoIdentity("conversation")));

    let (notifications, _pulls) = ScriptedNotifications::new();
    let feed = NotificationFeed::new(Arc::new(notifications));
    assert_matches!(
        feed.refresh(NotificationFilter::All).await,
        Err(InboxError::NoIdentity("user"))
    );
}

// ---------------------------------------------------------------------------
// Push and pull racing on the same records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_during_pull_is_neither_lost_nor_duplicated() {
    let (source, mut pulls) = ScriptedMessages::new();
    let feed = Arc::new(MessageFeed::new(Arc::new(source)));
    feed.switch_conversation(Some("T1".into()));

    let refresh = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.refresh().await })
    };
    let pull = pulls.recv().await.unwrap();

    // A new message and an echo of an existing one arrive mid-pull.
    for message in [msg("m3", "T1", 3), msg("m1", "T1", 1)] {
        feed.apply_frame(&Frame::MessageUpdate {
            message,
            action: UpdateAction::Created,
        });
    }

    pull.respond
        .send(Ok(vec![msg("m1", "T1", 1), msg("m2", "T1", 2)]))
        .unwrap();
    assert!(refresh.await.unwrap().unwrap());

    assert_eq!(message_ids(&feed), vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn posted_message_and_its_echo_collapse_to_one_entry() {
    let (source, _pulls) = ScriptedMessages::new();
    let feed = MessageFeed::new(Arc::new(source));
    feed.switch_conversation(Some("T1".into()));

    let posted = feed.post("hello").await.unwrap();
    feed.apply_frame(&Frame::MessageUpdate {
        message: posted.clone(),
        action: UpdateAction::Created,
    });

    let log = feed.log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].body, "hello");
}

#[tokio::test]
async fn failed_pull_keeps_cached_messages_and_reports_error() {
    let (source, mut pulls) = ScriptedMessages::new();
    let feed = Arc::new(MessageFeed::new(Arc::new(source)));
    feed.switch_conversation(Some("T1".into()));
    feed.apply_frame(&Frame::MessageUpdate {
        message: msg("m1", "T1", 1),
        action: UpdateAction::Created,
    });

    let refresh = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.refresh().await })
    };
    pulls
        .recv()
        .await
        .unwrap()
        .respond
        .send(Err(InboxError::Api {
            status: 401,
            body: "token expired".into(),
        }))
        .unwrap();

    assert_matches!(refresh.await.unwrap(), Err(InboxError::Api { status: 401, .. }));
    assert_eq!(message_ids(&feed), vec!["m1"]);
    assert_eq!(feed.error().as_deref(), Some("API error (401): token expired"));
}

// ---------------------------------------------------------------------------
// Optimistic mark-read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accepted_mark_read_sticks_after_refresh() {
    let (source, mut pulls) = ScriptedNotifications::new();
    let source = Arc::new(source);
    let feed = Arc::new(NotificationFeed::new(source.clone()));
    feed.switch_user(Some(1));
    feed.apply_frame(&Frame::NotificationUpdate {
        notification: note(5, 0, false),
        action: UpdateAction::Created,
    });

    let mark = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.mark_read(5).await })
    };

    // The follow-up refresh answers with the server's (already read) copy.
    let pull = pulls.recv().await.unwrap();
    assert_eq!(pull.filter, NotificationFilter::All);
    pull.respond.send(Ok(vec![note(5, 0, true)])).unwrap();
    mark.await.unwrap().unwrap();

    assert_eq!(source.marked(), vec![5]);
    assert_eq!(notification_ids(&feed, NotificationFilter::Read), vec![5]);
    assert_eq!(feed.unread_count(), 0);
}

#[tokio::test]
async fn rejected_mark_read_rolls_back_and_converges() {
    let (source, mut pulls) = ScriptedNotifications::new();
    source.reject_marks();
    let feed = Arc::new(NotificationFeed::new(Arc::new(source)));
    feed.switch_user(Some(1));
    feed.apply_frame(&Frame::NotificationUpdate {
        notification: note(5, 0, false),
        action: UpdateAction::Created,
    });

    let mark = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.mark_read(5).await })
    };
    let pull = pulls.recv().await.unwrap();

    // Rolled back before the refresh completes.
    assert_eq!(notification_ids(&feed, NotificationFilter::Unread), vec![5]);

    pull.respond.send(Ok(vec![note(5, 0, false)])).unwrap();
    assert_matches!(mark.await.unwrap(), Err(InboxError::Api { status: 403, .. }));

    assert_eq!(notification_ids(&feed, NotificationFilter::Unread), vec![5]);
    assert_eq!(feed.unread_count(), 1);
}

#[tokio::test]
async fn mark_all_read_clears_unread_view() {
    let (source, mut pulls) = ScriptedNotifications::new();
    let feed = Arc::new(NotificationFeed::new(Arc::new(source)));
    feed.switch_user(Some(1));
    for id in [1, 2, 3] {
        feed.apply_frame(&Frame::NotificationUpdate {
            notification: note(id, id as u32, false),
            action: UpdateAction::Created,
        });
    }
    assert_eq!(feed.unread_count(), 3);

    let mark = {
        let feed = Arc::clone(&feed);
        tokio::spawn(async move { feed.mark_all_read().await })
    };
    pulls
        .recv()
        .await
        .unwrap()
        .respond
        .send(Ok(vec![note(1, 1, true), note(2, 2, true), note(3, 3, true)]))
        .unwrap();
    mark.await.unwrap().unwrap();

    assert!(feed.list(NotificationFilter::Unread).is_empty());
    assert_eq!(notification_ids(&feed, NotificationFilter::All), vec![3, 2, 1]);
    assert_eq!(feed.unread_count(), 0);
}

// ---------------------------------------------------------------------------
// Channel frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn count_update_overrides_local_count_until_next_change() {
    let (source, _pulls) = ScriptedNotifications::new();
    let feed = NotificationFeed::new(Arc::new(source));
    feed.switch_user(Some(1));

    feed.apply_frame(&Frame::NotificationUpdate {
        notification: note(1, 0, false),
        action: UpdateAction::Created,
    });
    assert!(feed.apply_frame(&Frame::CountUpdate { unread_count: 42 }));
    assert_eq!(feed.unread_count(), 42);

    feed.apply_frame(&Frame::NotificationUpdate {
        notification: note(2, 1, false),
        action: UpdateAction::Created,
    });
    assert_eq!(feed.unread_count(), 2);
}

#[tokio::test]
async fn unrelated_frames_are_not_handled() {
    let (source, _pulls) = ScriptedMessages::new();
    let feed = MessageFeed::new(Arc::new(source));
    feed.switch_conversation(Some("T1".into()));

    assert!(!feed.apply_frame(&Frame::CountUpdate { unread_count: 1 }));
    assert!(!feed.apply_frame(&Frame::Unknown));
    assert!(feed.log().is_empty());
}
