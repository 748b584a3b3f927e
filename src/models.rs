//! Data transfer objects exposed by the API.
//!
//! Every struct in this module derives `JsonSchema` so `rocket_okapi` can describe
//! the payloads accurately in the generated OpenAPI document.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A normalized email row as persisted by the Mailbox Sync Engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Email {
    /// Database identifier.
    pub id: i64,
    /// Canonical mailbox address owning this row.
    pub account_id: String,
    /// Provider-assigned message identifier, unique within `account_id`.
    pub provider_message_id: String,
    /// Optional provider-assigned thread grouping.
    pub thread_id: Option<String>,
    /// Email subject line.
    pub subject: String,
    /// Sender address, as reported by the provider.
    pub sender: String,
    /// UTC instant the message was received, per the provider's authoritative clock.
    pub received_at: DateTime<Utc>,
    /// Decoded body, text or HTML.
    pub body: String,
    /// Whether `body` is HTML (drives markup stripping in the preprocessor).
    pub is_html: bool,
    /// Timestamp when the row was inserted into the store.
    pub created_at: DateTime<Utc>,
}

/// An email row joined with its committed summary, if one exists.
///
/// This is the thin external-contract read endpoint's shape (§6): a straight
/// join of `emails` and `email_ai_summaries`, no business logic attached.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct EmailWithSummary {
    pub id: i64,
    pub account_id: String,
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body: String,
    pub is_html: bool,
    pub created_at: DateTime<Utc>,
    /// Plain-text projection of the summary overview, when available.
    pub summary_text: Option<String>,
    /// Urgency bucket assigned by the summarizer, when available.
    pub urgency: Option<String>,
}

/// Structured output expected from one successful LLM invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummaryStruct {
    /// Short prose summary, hard-truncated to 200 characters.
    pub overview: String,
    /// Ordered action items, hard-truncated to 5 entries.
    pub action_items: Vec<String>,
    /// Coarse urgency bucket.
    pub urgency: Urgency,
}

/// Urgency bucket assigned to a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Process-wide sync policy consulted by the Mailbox Sync Engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct SyncPolicy {
    /// Whether the background worker loops should claim and process jobs.
    pub worker_enabled: bool,
    /// Maximum number of messages processed in one sync pass.
    pub max_emails_per_cycle: i32,
    /// Instant of the last policy update.
    pub updated_at: DateTime<Utc>,
}

/// Response shape for `POST /api/sync-now`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncNowResponse {
    /// Outcome of the sync pass.
    pub status: SyncStatus,
    /// Number of newly inserted emails.
    pub count: i64,
    /// Number of provider messages examined (including already-known ones).
    pub processed_count: i64,
}

/// Coarse outcome of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Done,
    AuthRequired,
    Error,
}

/// Response shape for `POST /api/emails/{provider_message_id}/summarize`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnqueueSummaryResponse {
    /// Outcome of the enqueue attempt.
    pub status: EnqueueStatus,
    /// Identifier of the job, present unless `status` is `no_key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<uuid::Uuid>,
}

/// Outcome of a manual summarize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueStatus {
    Queued,
    NoKey,
    Error,
}

/// Response shape for `GET /api/emails/{provider_message_id}/summary`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummaryFetchResponse {
    /// Whether a summary is ready or still pending.
    pub status: SummaryFetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Readiness state of a requested summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFetchStatus {
    Ready,
    Pending,
}

/// Response shape for `GET /api/accounts`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountsResponse {
    pub accounts: Vec<AccountSummary>,
}

/// Minimal account descriptor surfaced to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountSummary {
    pub account_id: String,
    pub connected: bool,
}

/// Pagination metadata accompanying list responses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageMetadata {
    /// One-based page index.
    pub page: i64,
    /// Page size.
    pub size: i64,
    /// Total number of pages.
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
    /// Total number of matching records.
    #[serde(rename = "totalElements")]
    pub total_elements: i64,
}

/// Wrapper for paginated datasets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PaginatedResponse<T> {
    /// Page content.
    pub data: Vec<T>,
    /// Associated pagination metadata.
    pub page: PageMetadata,
}

impl<T> PaginatedResponse<T> {
    /// Create a paginated response and compute pagination totals.
    pub fn new(data: Vec<T>, page: i64, size: i64, total_elements: i64) -> Self {
        let total_pages = if size > 0 {
            (total_elements + size - 1) / size
        } else {
            0
        };

        Self {
            data,
            page: PageMetadata {
                page,
                size,
                total_pages,
                total_elements,
            },
        }
    }
}

/// Generic wrapper used by endpoints that return simple collections.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    /// Response payload.
    pub data: T,
}
