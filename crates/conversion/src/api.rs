//! REST client for the attachment conversion endpoints.
//!
//! Two calls matter to the viewer:
//!
//! - `GET attachments/{id}/conversion-status/` returns
//!   `{"status": "pending" | "completed" | "passthrough" | "failed" | "not_supported", "error_message": …}`.
//! - `GET attachments/{id}/preview/[?refresh=true]` returns the converted
//!   artifact as a binary body once ready. Otherwise it answers with a JSON
//!   envelope and a status code: 202 while processing, 415 for an
//!   unsupported type, 404 if the attachment is gone, 503 if conversion
//!   failed server-side.

use async_trait::async_trait;
use serde::Deserialize;
use servicedesk_core::types::DbId;

/// Status of a server-side conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued or converting.
    Pending,
    /// The artifact is ready to fetch.
    Completed,
    /// The file needs no conversion; the original is served as-is.
    Passthrough,
    Failed(String),
    NotSupported(String),
}

/// A fetched, previewable artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Result of one artifact fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready(Artifact),
    Processing,
    NotSupported(String),
    Failed(String),
}

/// Errors from the conversion REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ConversionApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a status code with no conversion meaning.
    #[error("Conversion API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A JSON body did not match the status envelope.
    #[error("Unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Status-check and artifact-fetch seam used by the viewer.
#[async_trait]
pub trait ConversionSource: Send + Sync + 'static {
    async fn check_status(&self, attachment_id: DbId) -> Result<JobStatus, ConversionApiError>;

    /// Fetch the artifact. `refresh` asks the server to bypass its cache.
    async fn fetch_artifact(
        &self,
        attachment_id: DbId,
        refresh: bool,
    ) -> Result<FetchOutcome, ConversionApiError>;
}

const UNSUPPORTED_MESSAGE: &str = "Preview is not available for this file type";
const FAILED_MESSAGE: &str = "Document conversion failed";
const MISSING_MESSAGE: &str = "Attachment not found";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawStatus {
    Pending,
    Processing,
    Completed,
    Passthrough,
    Failed,
    NotSupported,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: RawStatus,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StatusEnvelope {
    fn message_or(&self, fallback: &str) -> String {
        self.error_message
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    fn into_job_status(self) -> JobStatus {
        match self.status {
            RawStatus::Pending | RawStatus::Processing => JobStatus::Pending,
            RawStatus::Completed => JobStatus::Completed,
            RawStatus::Passthrough => JobStatus::Passthrough,
            RawStatus::Failed => JobStatus::Failed(self.message_or(FAILED_MESSAGE)),
            RawStatus::NotSupported => JobStatus::NotSupported(self.message_or(UNSUPPORTED_MESSAGE)),
            RawStatus::Unknown => {
                tracing::warn!("Unknown conversion status, treating as pending");
                JobStatus::Pending
            }
        }
    }
}

/// HTTP client for the conversion endpoints of one service-desk API.
#[derive(Clone)]
pub struct ConversionApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ConversionApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// `GET attachments/{id}/conversion-status/`.
    pub async fn conversion_status(&self, attachment_id: DbId) -> Result<JobStatus, ConversionApiError> {
        let response = self
            .request(&format!("attachments/{attachment_id}/conversion-status/"))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        let envelope: StatusEnvelope = serde_json::from_slice(&bytes)?;
        Ok(envelope.into_job_status())
    }

    /// `GET attachments/{id}/preview/`, with `?refresh=true` to bypass the
    /// server's cached artifact.
    pub async fn preview(&self, attachment_id: DbId, refresh: bool) -> Result<FetchOutcome, ConversionApiError> {
        let mut request = self.request(&format!("attachments/{attachment_id}/preview/"));
        if refresh {
            request = request.query(&[("refresh", "true")]);
        }
        let response = request.send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let is_json = content_type.starts_with("application/json");
        let bytes = response.bytes().await?;
        let envelope = if is_json {
            serde_json::from_slice::<StatusEnvelope>(&bytes).ok()
        } else {
            None
        };
        let message = |fallback: &str| {
            envelope
                .as_ref()
                .map_or_else(|| fallback.to_string(), |e| e.message_or(fallback))
        };

        let outcome = match status {
            202 => FetchOutcome::Processing,
            415 => FetchOutcome::NotSupported(message(UNSUPPORTED_MESSAGE)),
            404 => FetchOutcome::Failed(message(MISSING_MESSAGE)),
            503 => FetchOutcome::Failed(message(FAILED_MESSAGE)),
            // A JSON body is a status envelope only when it names a pending
            // or failed job; anything else is the artifact itself.
            200..=299 => match envelope.as_ref().map(|e| &e.status) {
                Some(RawStatus::Pending | RawStatus::Processing) => FetchOutcome::Processing,
                Some(RawStatus::NotSupported) => FetchOutcome::NotSupported(message(UNSUPPORTED_MESSAGE)),
                Some(RawStatus::Failed) => FetchOutcome::Failed(message(FAILED_MESSAGE)),
                Some(RawStatus::Completed | RawStatus::Passthrough | RawStatus::Unknown) | None => {
                    FetchOutcome::Ready(Artifact {
                        bytes: bytes.to_vec(),
                        content_type,
                    })
                }
            },
            _ => {
                return Err(ConversionApiError::Api {
                    status,
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                })
            }
        };
        Ok(outcome)
    }

    // ---- private helpers ----

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}/{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ConversionApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ConversionApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ConversionSource for ConversionApi {
    async fn check_status(&self, attachment_id: DbId) -> Result<JobStatus, ConversionApiError> {
        self.conversion_status(attachment_id).await
    }

    async fn fetch_artifact(
        &self,
        attachment_id: DbId,
        refresh: bool,
    ) -> Result<FetchOutcome, ConversionApiError> {
        self.preview(attachment_id, refresh).await
    }
}
