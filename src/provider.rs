//! Provider Adapter (C2): opaque interface to a hosted mailbox.
//!
//! List message IDs since a cursor, fetch a raw message by ID. The provider's
//! wire format and authentication scheme are external; this module only fixes
//! the shape the Mailbox Sync Engine (C7) consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("credentials rejected by provider")]
    AuthRequired,
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned an unparseable response: {0}")]
    BadResponse(String),
}

/// One message as reported by the provider, prior to any normalization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender: String,
    /// The provider's authoritative epoch timestamp, when available. Preferred
    /// over `date_header` for deriving `received_at` (§4.1 step 4).
    pub received_epoch: Option<DateTime<Utc>>,
    /// A textual `Date:`-style header, used only when `received_epoch` is absent.
    pub date_header: Option<String>,
    pub body: String,
    pub is_html: bool,
}

/// Result of listing message IDs since a cursor.
pub struct ListResult {
    pub message_ids: Vec<String>,
    /// The provider's current marker, to be persisted as the new cursor once the
    /// batch it demarcates has been durably committed.
    pub next_cursor: String,
}

/// Contract the Mailbox Sync Engine depends on.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// List message IDs observed since `cursor` (or, if `cursor` is `None`, the
    /// most recent `bootstrap_limit` messages).
    async fn list_since(
        &self,
        account_id: &str,
        access_token: &str,
        cursor: Option<&str>,
        bootstrap_limit: usize,
    ) -> Result<ListResult, ProviderError>;

    /// Fetch one raw message by provider ID.
    async fn fetch_message(
        &self,
        account_id: &str,
        access_token: &str,
        provider_message_id: &str,
    ) -> Result<RawMessage, ProviderError>;
}

/// HTTP-backed adapter against a configured provider REST endpoint.
///
/// Grounded in the same `reqwest::Client` + bearer-token request shape this
/// codebase already uses for its outbound LLM/embeddings calls — the provider
/// here is just another JSON HTTP collaborator.
pub struct HttpProviderAdapter {
    base_url: String,
    http: reqwest::Client,
}

impl HttpProviderAdapter {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[derive(serde::Deserialize)]
struct ListResponse {
    message_ids: Vec<String>,
    next_cursor: String,
}

#[derive(serde::Deserialize)]
struct MessageResponse {
    provider_message_id: String,
    thread_id: Option<String>,
    subject: String,
    sender: String,
    received_epoch: Option<DateTime<Utc>>,
    date_header: Option<String>,
    body: String,
    #[serde(default)]
    is_html: bool,
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    async fn list_since(
        &self,
        account_id: &str,
        access_token: &str,
        cursor: Option<&str>,
        bootstrap_limit: usize,
    ) -> Result<ListResult, ProviderError> {
        let mut request = self
            .http
            .get(format!("{}/mailboxes/{}/messages", self.base_url, account_id))
            .bearer_auth(access_token)
            .query(&[("limit", bootstrap_limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthRequired);
        }
        let response = response.error_for_status()?;
        let parsed: ListResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::BadResponse(e.to_string()))?;

        Ok(ListResult {
            message_ids: parsed.message_ids,
            next_cursor: parsed.next_cursor,
        })
    }

    async fn fetch_message(
        &self,
        account_id: &str,
        access_token: &str,
        provider_message_id: &str,
    ) -> Result<RawMessage, ProviderError> {
        let response = self
            .http
            .get(format!(
                "{}/mailboxes/{}/messages/{}",
                self.base_url, account_id, provider_message_id
            ))
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthRequired);
        }
        let response = response.error_for_status()?;
        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::BadResponse(e.to_string()))?;

        Ok(RawMessage {
            provider_message_id: parsed.provider_message_id,
            thread_id: parsed.thread_id,
            subject: parsed.subject,
            sender: parsed.sender,
            received_epoch: parsed.received_epoch,
            date_header: parsed.date_header,
            body: parsed.body,
            is_html: parsed.is_html,
        })
    }
}
