//! Summarizer Worker (C9): drains the Job Store, calls the LLM under bounded
//! concurrency and rate-limit-aware retry, commits idempotently, and emits a
//! realtime notification. See §4.4 for the full algorithm.

pub mod llm_client;

pub use llm_client::{LlmClient, LlmError};

use crate::events::EventFabric;
use crate::models::SummaryStruct;
use crate::preprocess::{self, tokens, PreprocessConfig};
use crate::sync::queue::{ClaimedJob, JobErrorCode, JobQueue};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Process-wide cap on in-flight LLM calls (§4.4, §5 P6).
pub const MAX_CONCURRENT_REQUESTS: usize = 3;

/// Fixed 429 retry schedule (§4.4 step 5): up to 3 retries at these waits.
const RATE_LIMIT_BACKOFFS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

#[derive(Clone)]
pub struct WorkerConfig {
    pub batch_size: i64,
    pub idle_sleep: Duration,
    pub worker_id: String,
    pub prompt_version: String,
    pub strip_reply_chains: bool,
}

/// Drives the main claim/dispatch loop and per-job processing.
pub struct Worker {
    pool: PgPool,
    queue: JobQueue,
    events: EventFabric,
    llm: Option<Arc<LlmClient>>,
    semaphore: Arc<Semaphore>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        events: EventFabric,
        llm: Option<LlmClient>,
        config: WorkerConfig,
    ) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self {
            pool,
            queue,
            events,
            llm: llm.map(Arc::new),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
            config,
        }
    }

    /// Main loop (§4.4): claim a batch, dispatch each job as an independent
    /// task, idle-sleep only when the batch came back empty.
    pub async fn run(self: Arc<Self>) {
        loop {
            let claimed = match self.queue.claim(&self.config.worker_id, self.config.batch_size).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    log::error!("worker: claim failed: {e}");
                    tokio::time::sleep(self.config.idle_sleep).await;
                    continue;
                }
            };

            if claimed.is_empty() {
                tokio::time::sleep(self.config.idle_sleep).await;
                continue;
            }

            let mut handles = Vec::with_capacity(claimed.len());
            for job in claimed {
                let worker = Arc::clone(&self);
                handles.push(tokio::spawn(async move { worker.process(job).await }));
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    log::error!("worker: job task panicked: {e}");
                }
            }
        }
    }

    /// `process(job)` (§4.4): the 9-step per-job algorithm.
    async fn process(&self, job: ClaimedJob) {
        let outcome = self.process_inner(&job).await;
        match outcome {
            Ok(()) => {
                match self.queue.mark_succeeded(job.job_id).await {
                    Ok(()) => {
                        self.events
                            .emit_ai_summary_ready(&job.account_id, &job.provider_message_id);
                    }
                    Err(e) => {
                        // Lost lease: someone else owns completion now. Log and move on.
                        log::warn!("worker: mark_succeeded lost lease for {}: {e}", job.job_id);
                    }
                }
            }
            Err((code, retryable)) => {
                if !retryable {
                    log::error!(
                        "worker: job {} failed non-retryably with {:?}",
                        job.job_id,
                        code
                    );
                }
                if let Err(e) = self.queue.mark_failed(job.job_id, code, job.attempts).await {
                    log::error!("worker: mark_failed errored for {}: {e}", job.job_id);
                }
            }
        }
    }

    async fn process_inner(&self, job: &ClaimedJob) -> Result<(), (JobErrorCode, bool)> {
        // Step 1: load the email row.
        let email: Option<(String, String, bool)> = sqlx::query_as(
            "SELECT subject, body, is_html FROM emails WHERE account_id = $1 AND provider_message_id = $2",
        )
        .bind(&job.account_id)
        .bind(&job.provider_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            log::error!("worker: email lookup failed: {e}");
            (JobErrorCode::StoreFailed, true)
        })?;

        let (subject, body, is_html) = email.ok_or((JobErrorCode::EmailNotFound, false))?;

        // Step 2: preprocess.
        let cfg = PreprocessConfig {
            strip_reply_chains: self.config.strip_reply_chains,
        };
        let (cleaned_text, _stats) = preprocess::preprocess(&subject, &body, is_html, cfg);
        let model = self
            .llm
            .as_ref()
            .map(|client| client.model_name())
            .unwrap_or_default();
        let budgeted = tokens::apply_budget(&cleaned_text);
        let input_hash = tokens::input_hash(&self.config.prompt_version, &model, &budgeted.text);

        // Step 3: cache check — existing summary under the same key is a
        // no-op success (L2).
        let existing: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM email_ai_summaries
            WHERE account_id = $1 AND provider_message_id = $2
              AND prompt_version = $3 AND input_hash = $4
            "#,
        )
        .bind(&job.account_id)
        .bind(&job.provider_message_id)
        .bind(&self.config.prompt_version)
        .bind(&input_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            log::error!("worker: summary cache lookup failed: {e}");
            (JobErrorCode::StoreFailed, true)
        })?;

        if existing.is_some() {
            return Ok(());
        }

        let llm = self.llm.as_ref().ok_or((JobErrorCode::PreprocessFailed, false))?;

        // Steps 4-5: semaphore-bounded call with 429 retry.
        let summary = self
            .call_with_retry(llm, &subject, &budgeted.text)
            .await
            .map_err(|e| match e {
                LlmError::Unparseable(_) => (JobErrorCode::ParseFailed, true),
                _ => (JobErrorCode::MistralFailed, true),
            })?;

        // Step 7: commit under the uniqueness key; conflict means a
        // concurrent worker already won the race (treated as success).
        self.commit_summary(job, &model, &input_hash, &summary)
            .await
            .map_err(|e| {
                log::error!("worker: summary commit failed: {e}");
                (JobErrorCode::StoreFailed, true)
            })?;

        Ok(())
    }

    /// Steps 4-5 (§4.4): acquire the global semaphore, call the LLM, and on a
    /// 429 release the permit across the fixed backoff before retrying.
    async fn call_with_retry(
        &self,
        llm: &LlmClient,
        subject: &str,
        cleaned_text: &str,
    ) -> Result<SummaryStruct, LlmError> {
        let mut attempt = 0usize;
        loop {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let result = llm
                .complete(subject, cleaned_text, tokens::MAX_OUTPUT_TOKENS)
                .await;
            drop(permit);

            match result {
                Ok(summary) => return Ok(summary),
                Err(LlmError::RateLimited) if attempt < RATE_LIMIT_BACKOFFS.len() => {
                    let wait = RATE_LIMIT_BACKOFFS[attempt];
                    log::debug!("worker: rate-limited, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn commit_summary(
        &self,
        job: &ClaimedJob,
        model: &str,
        input_hash: &str,
        summary: &SummaryStruct,
    ) -> Result<(), sqlx::Error> {
        let summary_json = serde_json::to_value(summary).unwrap_or(serde_json::Value::Null);
        sqlx::query(
            r#"
            INSERT INTO email_ai_summaries
                (account_id, provider_message_id, prompt_version, model, input_hash, summary_struct, summary_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id, provider_message_id, prompt_version) DO NOTHING
            "#,
        )
        .bind(&job.account_id)
        .bind(&job.provider_message_id)
        .bind(&self.config.prompt_version)
        .bind(model)
        .bind(input_hash)
        .bind(&summary_json)
        .bind(&summary.overview)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
