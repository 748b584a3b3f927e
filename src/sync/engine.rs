//! Mailbox Sync Engine (C7): drives the Provider Adapter against the Email
//! Store, Sync Cursor Store, and Job Store for one account's sync pass.
//!
//! See §4.1 for the full algorithm. Credential lookup, provider polling, and
//! persistence are all fallible independently; a fetch error for one message
//! does not abort the pass (§4.1 Failure semantics) but a credential failure
//! does.

use crate::credentials::{CredentialAccessor, CredentialError};
use crate::events::EventFabric;
use crate::models::{SyncNowResponse, SyncStatus};
use crate::provider::{ProviderAdapter, ProviderError};
use crate::sync::normalize::normalize;
use crate::sync::queue::JobQueue;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Hardcoded bootstrap ceiling (§9 open-question resolution): the effective
/// bootstrap cap is `min(BOOTSTRAP_CEILING, max_emails_per_cycle)`.
const BOOTSTRAP_CEILING: usize = 30;

/// Per-pass budget for jobs enqueued, to avoid overwhelming the summarizer
/// worker (§4.1 Budget caps). Enforced by capping the number of messages
/// processed per pass at `min(policy_cap, MAX_JOBS_PER_PASS)`, so every
/// message processed also gets enqueued on insert — no inserted email is
/// ever left without a job.
const MAX_JOBS_PER_PASS: usize = 30;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Orchestrates sync passes for all accounts, serializing concurrent triggers
/// for the same account via a per-account in-process mutex registry (§4.1
/// Concurrency) while letting different accounts proceed independently.
pub struct SyncEngine {
    pool: PgPool,
    credentials: Arc<dyn CredentialAccessor>,
    provider: Arc<dyn ProviderAdapter>,
    queue: JobQueue,
    events: EventFabric,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SyncEngine {
    pub fn new(
        pool: PgPool,
        credentials: Arc<dyn CredentialAccessor>,
        provider: Arc<dyn ProviderAdapter>,
        events: EventFabric,
    ) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self {
            pool,
            credentials,
            provider,
            queue,
            events,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn max_emails_per_cycle(&self) -> Result<i64, sqlx::Error> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT max_emails_per_cycle FROM sync_policy LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v as i64).unwrap_or(BOOTSTRAP_CEILING as i64))
    }

    /// `sync(account_id)` (§4.1 public contract). Runs the full 9-step
    /// algorithm and returns the counts the Sync Trigger API (C11) surfaces.
    pub async fn sync(&self, account_id: &str) -> Result<SyncNowResponse, SyncError> {
        let lock = self.lock_for(account_id);
        let _guard = lock.lock().await;

        // Step 3 precondition: credentials resolved up front. A failure here
        // aborts the pass without touching the cursor (auth_required).
        let token = match self.credentials.token_for(account_id).await {
            Ok(token) => token,
            Err(CredentialError::NotConnected(_)) | Err(CredentialError::RefreshFailed(_)) => {
                self.append_audit(account_id, "sync_auth_required", serde_json::json!({}))
                    .await
                    .ok();
                return Ok(SyncNowResponse {
                    status: SyncStatus::AuthRequired,
                    count: 0,
                    processed_count: 0,
                });
            }
        };

        // Step 1: load cursor, or fall back to a bounded bootstrap listing.
        let cursor = crate::sync::database::load_cursor(&self.pool, account_id).await?;
        let policy_cap = self.max_emails_per_cycle().await?;
        let bootstrap_limit = (BOOTSTRAP_CEILING as i64).min(policy_cap).max(0) as usize;

        // Step 2: ask the provider what's new.
        let listing = match self
            .provider
            .list_since(account_id, &token.access_token, cursor.as_deref(), bootstrap_limit)
            .await
        {
            Ok(listing) => listing,
            Err(ProviderError::AuthRequired) => {
                self.append_audit(account_id, "sync_auth_required", serde_json::json!({}))
                    .await
                    .ok();
                return Ok(SyncNowResponse {
                    status: SyncStatus::AuthRequired,
                    count: 0,
                    processed_count: 0,
                });
            }
            Err(e) => {
                log::error!("sync: provider list_since failed for {account_id}: {e}");
                self.append_audit(
                    account_id,
                    "sync_error",
                    serde_json::json!({ "detail": e.to_string() }),
                )
                .await
                .ok();
                return Ok(SyncNowResponse {
                    status: SyncStatus::Error,
                    count: 0,
                    processed_count: 0,
                });
            }
        };

        // Cap the messages processed this pass at the lesser of the policy
        // budget and the per-pass job budget, so every email this pass
        // inserts also gets enqueued — otherwise an email past the job cap
        // would be inserted but never enqueued, and a later re-sync would
        // not retry the enqueue (`ON CONFLICT DO NOTHING` on `emails` means
        // `rows_affected() == 0` on the message it already holds).
        let message_cap = (policy_cap.max(0) as usize).min(MAX_JOBS_PER_PASS);
        let message_ids: Vec<&String> = listing.message_ids.iter().take(message_cap).collect();

        let mut new_count: i64 = 0;
        let mut processed_count: i64 = 0;
        let mut any_failure = false;

        // Steps 3-6: fetch, normalize, dedup-insert, enqueue — per message. A
        // fetch error for one message is logged and skipped rather than
        // aborting the whole pass (§4.1 Failure semantics).
        for provider_message_id in message_ids {
            processed_count += 1;

            let raw = match self
                .provider
                .fetch_message(account_id, &token.access_token, provider_message_id)
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!(
                        "sync: fetch_message failed for {account_id}/{provider_message_id}: {e}"
                    );
                    any_failure = true;
                    continue;
                }
            };

            let normalized = match normalize(raw) {
                Ok(normalized) => normalized,
                Err(e) => {
                    log::warn!("sync: normalize failed for {account_id}/{provider_message_id}: {e}");
                    any_failure = true;
                    continue;
                }
            };

            let inserted = sqlx::query(
                r#"
                INSERT INTO emails
                    (account_id, provider_message_id, thread_id, subject, sender, received_at, body, is_html)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (account_id, provider_message_id) DO NOTHING
                "#,
            )
            .bind(account_id)
            .bind(&normalized.provider_message_id)
            .bind(&normalized.thread_id)
            .bind(&normalized.subject)
            .bind(&normalized.sender)
            .bind(normalized.received_at)
            .bind(&normalized.body)
            .bind(normalized.is_html)
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() > 0 {
                new_count += 1;
                self.queue
                    .enqueue(account_id, &normalized.provider_message_id)
                    .await?;
            }
        }

        // Step 7: advance the cursor past the committed batch — but only if
        // every message in the batch was fetched and normalized cleanly. A
        // skipped message sits behind `listing.next_cursor`; advancing past
        // it anyway would mean the provider never offers it again (§4.1
        // Failure semantics: "cursor advancement must never lead the
        // committed email set"). Holding the cursor here means the next pass
        // re-lists the whole batch, which is safe: the insert and enqueue
        // above are both dedup-safe on conflict.
        if any_failure {
            log::warn!(
                "sync: holding cursor for {account_id} after partial-batch failure; next pass will re-list"
            );
        } else {
            crate::sync::database::advance_cursor(&self.pool, account_id, &listing.next_cursor)
                .await?;
        }

        // Step 8: emit emails_updated, always, even when count_new == 0
        // (§9 open-question resolution, scenario 2).
        self.events.emit_emails_updated(account_id, new_count);

        // Step 9: audit log row summarizing the pass.
        self.append_audit(
            account_id,
            "sync_done",
            serde_json::json!({ "status": "done", "new_count": new_count, "processed_count": processed_count }),
        )
        .await
        .ok();

        Ok(SyncNowResponse {
            status: SyncStatus::Done,
            count: new_count,
            processed_count,
        })
    }

    async fn append_audit(
        &self,
        account_id: &str,
        event_type: &str,
        detail: serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO audit_log (account_id, event_type, detail) VALUES ($1, $2, $3)",
        )
        .bind(account_id)
        .bind(event_type)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
