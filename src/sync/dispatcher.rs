//! Background sync dispatcher: the process-owned loop that keeps every known
//! account's mailbox reconciled without an external trigger (§4.1, §6
//! `WORKER_MODE`).
//!
//! Unlike the Summarizer Worker, there is no queue of "sync jobs" to claim —
//! the population to reconcile is simply every account the Credential
//! Accessor currently holds a token for. Each cycle walks that list and calls
//! [`SyncEngine::sync`] once per account, exactly as `POST /sync-now` would,
//! then sleeps before the next cycle. A slow or failing account never blocks
//! its peers: errors are logged and the loop moves on.

use crate::credentials::CredentialAccessor;
use crate::sync::engine::SyncEngine;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Interval between full reconciliation cycles. Not part of the recognized
/// configuration surface (§6) — like the LLM parameters, this is a fixed
/// operational knob rather than something operators tune per deployment.
const SYNC_CYCLE_INTERVAL: Duration = Duration::from_secs(60);

pub struct SyncDispatcher {
    pool: PgPool,
    credentials: Arc<dyn CredentialAccessor>,
    engine: Arc<SyncEngine>,
}

impl SyncDispatcher {
    pub fn new(pool: PgPool, credentials: Arc<dyn CredentialAccessor>, engine: Arc<SyncEngine>) -> Self {
        Self {
            pool,
            credentials,
            engine,
        }
    }

    /// Runs forever. Intended to be spawned as a background task at liftoff.
    pub async fn run(self) {
        loop {
            match self.worker_enabled().await {
                Ok(true) => self.run_cycle().await,
                Ok(false) => log::debug!("dispatcher: worker_enabled=false, skipping cycle"),
                Err(e) => log::error!("dispatcher: failed to read sync policy: {e}"),
            }

            tokio::time::sleep(SYNC_CYCLE_INTERVAL).await;
        }
    }

    async fn worker_enabled(&self) -> Result<bool, sqlx::Error> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT worker_enabled FROM sync_policy LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(enabled,)| enabled).unwrap_or(true))
    }

    async fn run_cycle(&self) {
        let accounts = self.credentials.list_accounts().await;
        log::debug!("dispatcher: reconciling {} account(s)", accounts.len());

        for account_id in accounts {
            match self.engine.sync(&account_id).await {
                Ok(result) => {
                    log::info!(
                        "dispatcher: synced {account_id}: status={:?} count={} processed={}",
                        result.status,
                        result.count,
                        result.processed_count
                    );
                }
                Err(e) => {
                    log::error!("dispatcher: sync failed for {account_id}: {e}");
                }
            }
        }
    }
}
