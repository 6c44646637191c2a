/// Errors from the inbox REST sources and feeds.
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body was JSON but not a recognised list or record shape.
    #[error("Unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),

    /// No user or conversation is selected on the feed.
    #[error("No {0} selected")]
    NoIdentity(&'static str),
}
