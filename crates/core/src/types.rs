/// Server-side primary keys (users, notifications, tickets, attachments).
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
