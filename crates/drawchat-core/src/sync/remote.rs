//! Remote conversation store client.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ConversationPushItem, PullResponse, PushResponse, SyncCursor};
use crate::util::normalize_text_option;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote store configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote store HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote store API error: {0}")]
    Api(String),
    #[error("Invalid remote store payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl From<RemoteError> for crate::Error {
    fn from(error: RemoteError) -> Self {
        Self::Remote(error.to_string())
    }
}

/// The push/pull RPC pair of the authoritative remote store.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Upload conversations and tombstones. Returns the new sync cursor.
    async fn push(&self, conversations: &[ConversationPushItem]) -> RemoteResult<PushResponse>;

    /// Fetch up to `limit` records changed since `cursor`.
    async fn pull(&self, cursor: Option<&SyncCursor>, limit: usize) -> RemoteResult<PullResponse>;
}

/// JSON-over-HTTP remote store using a bearer access token.
#[derive(Clone)]
pub struct HttpRemoteStore {
    endpoint: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    conversations: &'a [ConversationPushItem],
}

impl HttpRemoteStore {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> RemoteResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let access_token = normalize_text_option(Some(access_token.into())).ok_or_else(|| {
            RemoteError::InvalidConfiguration("access token must not be empty".to_string())
        })?;
        Ok(Self {
            endpoint,
            access_token,
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn push_url(&self) -> String {
        format!("{}/v1/conversations/push", self.endpoint)
    }

    fn pull_url(&self, cursor: Option<&SyncCursor>, limit: usize) -> String {
        let mut url = format!("{}/v1/conversations/pull?limit={limit}", self.endpoint);
        if let Some(cursor) = cursor {
            url.push_str("&cursor=");
            url.push_str(&urlencoding::encode(cursor.as_str()));
        }
        url
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> RemoteResult<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|error| RemoteError::InvalidPayload(error.to_string()))
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn push(&self, conversations: &[ConversationPushItem]) -> RemoteResult<PushResponse> {
        tracing::debug!("Pushing {} conversations", conversations.len());
        let response = self
            .client
            .post(self.push_url())
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .json(&PushRequest { conversations })
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn pull(&self, cursor: Option<&SyncCursor>, limit: usize) -> RemoteResult<PullResponse> {
        let response = self
            .client
            .get(self.pull_url(cursor, limit))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RemoteErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> RemoteResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
