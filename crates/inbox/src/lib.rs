//! Notification and conversation stores fed by pull and push.
//!
//! - [`envelope`]: flattens the REST list shapes into one `Vec`.
//! - [`reconcile`]: [`RecordSet`], the merge keyed by record identity that
//!   both producers (REST pull, socket push) feed.
//! - [`notifications`]: [`NotificationStore`] and its async [`NotificationFeed`].
//! - [`messages`]: [`MessageStore`] and its async [`MessageFeed`].
//! - [`api`]: the REST sources backed by reqwest.
//! - [`channels`]: routes channel frames into a feed, resyncs on reconnect,
//!   and sends outbound frames.

pub mod api;
pub mod channels;
pub mod envelope;
pub mod error;
pub mod messages;
pub mod notifications;
pub mod reconcile;

pub use api::DeskApi;
pub use channels::{attach_channel, ChannelSink, FrameSender};
pub use error::InboxError;
pub use messages::{MessageFeed, MessageSource, MessageStore};
pub use notifications::{NotificationFeed, NotificationFilter, NotificationSource, NotificationStore};
pub use reconcile::{PullScope, PullTicket, RecordSet};
