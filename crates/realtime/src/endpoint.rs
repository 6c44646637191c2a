//! Channel endpoint description.
//!
//! A [`ChannelEndpoint`] is a URL template such as
//! `wss://desk.example.com/ws/notifications/{user_id}/` plus the identity
//! parameters that fill its placeholders and an optional bearer token.
//! The token travels as the `token` query parameter; the gateway in front
//! of the socket server authenticates on it.

use std::collections::BTreeMap;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use servicedesk_core::error::CoreError;
use servicedesk_core::types::DbId;

/// Everything except RFC 3986 unreserved characters is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where and as whom to open a channel. Immutable once handed to a
/// [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    template: String,
    params: BTreeMap<String, String>,
    token: Option<String>,
}

impl ChannelEndpoint {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            params: BTreeMap::new(),
            token: None,
        }
    }

    /// Per-user notification channel under `ws_base`.
    pub fn notifications(ws_base: &str, user_id: DbId) -> Self {
        Self::new(format!(
            "{}/notifications/{{user_id}}/",
            ws_base.trim_end_matches('/')
        ))
        .with_param("user_id", user_id.to_string())
    }

    /// Per-conversation message channel under `ws_base`.
    pub fn conversation(ws_base: &str, conversation_id: &str) -> Self {
        Self::new(format!(
            "{}/conversations/{{conversation_id}}/",
            ws_base.trim_end_matches('/')
        ))
        .with_param("conversation_id", conversation_id)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Render the concrete socket URL.
    ///
    /// Every `{name}` placeholder must have a non-empty parameter.
    /// Parameter values and the token are percent-encoded.
    pub fn url(&self) -> Result<String, CoreError> {
        let mut url = self.template.clone();
        for (name, value) in &self.params {
            url = url.replace(&format!("{{{name}}}"), &encode(name, value)?);
        }

        if let Some(start) = url.find('{') {
            let rest = &url[start + 1..];
            let name = rest.split('}').next().unwrap_or(rest);
            return Err(CoreError::Validation(format!(
                "missing endpoint parameter '{name}'"
            )));
        }

        if let Some(token) = &self.token {
            let token = encode("token", token)?;
            let separator = if url.contains('?') { '&' } else { '?' };
            url = format!("{url}{separator}token={token}");
        }

        Ok(url)
    }
}

fn encode(name: &str, value: &str) -> Result<String, CoreError> {
    if value.is_empty() {
        return Err(CoreError::Validation(format!(
            "endpoint parameter '{name}' is empty"
        )));
    }
    Ok(utf8_percent_encode(value, COMPONENT).to_string())
}
