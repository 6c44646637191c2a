//! REST client for the service-desk notification and conversation endpoints.
//!
//! Wraps the list, mark-read and post endpoints using [`reqwest`]. Every
//! request carries the bearer token when one is configured. List bodies go
//! through [`normalize_list`](crate::envelope::normalize_list), so any of
//! the paginated envelopes the server emits is accepted.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use servicedesk_core::records::{MessageRecord, NotificationRecord};
use servicedesk_core::types::DbId;

use crate::envelope::normalize_list;
use crate::error::InboxError;
use crate::messages::MessageSource;
use crate::notifications::{NotificationFilter, NotificationSource};

/// HTTP client for one service-desk API.
#[derive(Clone)]
pub struct DeskApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl DeskApi {
    /// * `base_url` - API root, e.g. `https://desk.example.com/api`.
    /// * `token` - bearer token sent on every request, if any.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token,
        }
    }

    /// Fetch one category of the current user's notifications.
    ///
    /// `GET notifications/`, `notifications/unread/` or `notifications/read/`.
    pub async fn list_notifications(
        &self,
        filter: NotificationFilter,
    ) -> Result<Vec<NotificationRecord>, InboxError> {
        let path = match filter {
            NotificationFilter::All => "notifications/",
            NotificationFilter::Unread => "notifications/unread/",
            NotificationFilter::Read => "notifications/read/",
        };
        let response = self.get_request(path).send().await?;
        Self::parse_list(response).await
    }

    /// `POST notifications/{id}/mark-read/`.
    pub async fn mark_notification_read(&self, notification_id: DbId) -> Result<(), InboxError> {
        let response = self
            .post_request(&format!("notifications/{notification_id}/mark-read/"))
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// `POST notifications/mark-all-read/`.
    pub async fn mark_all_notifications_read(&self) -> Result<(), InboxError> {
        let response = self.post_request("notifications/mark-all-read/").send().await?;
        Self::check_status(response).await
    }

    /// `GET conversations/{id}/messages/`.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, InboxError> {
        let response = self
            .get_request(&format!("conversations/{conversation_id}/messages/"))
            .send()
            .await?;
        Self::parse_list(response).await
    }

    /// `POST conversations/{id}/messages/`. Returns the stored message.
    pub async fn post_message(
        &self,
        conversation_id: &str,
        body: &str,
    ) -> Result<MessageRecord, InboxError> {
        let payload = serde_json::json!({ "content": body });
        let response = self
            .post_request(&format!("conversations/{conversation_id}/messages/"))
            .json(&payload)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    fn get_request(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post_request(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`InboxError::Api`] containing
    /// the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, InboxError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(InboxError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, InboxError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Parse a list body in any of the supported envelopes.
    async fn parse_list<T: DeserializeOwned>(response: reqwest::Response) -> Result<Vec<T>, InboxError> {
        let body: serde_json::Value = Self::parse_response(response).await?;
        Ok(normalize_list(body)?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), InboxError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSource for DeskApi {
    async fn list(&self, filter: NotificationFilter) -> Result<Vec<NotificationRecord>, InboxError> {
        self.list_notifications(filter).await
    }

    async fn mark_read(&self, notification_id: DbId) -> Result<(), InboxError> {
        self.mark_notification_read(notification_id).await
    }

    async fn mark_all_read(&self) -> Result<(), InboxError> {
        self.mark_all_notifications_read().await
    }
}

#[async_trait]
impl MessageSource for DeskApi {
    async fn list(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, InboxError> {
        self.list_messages(conversation_id).await
    }

    async fn post(&self, conversation_id: &str, body: &str) -> Result<MessageRecord, InboxError> {
        self.post_message(conversation_id, body).await
    }
}
