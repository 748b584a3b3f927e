//! Job Store & Claim Protocol (C5).
//!
//! Durable, polled, lease-based queue with idempotent insert, at-least-once
//! claim via skip-locked selection, retry with exponential backoff, and
//! dead-lettering. See §4.2 for the full operation contract.

use chrono::{DateTime, Duration, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::{self, PgPool, Postgres, QueryBuilder};

/// Current lifecycle state of a job (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Dead,
}

/// Error codes surfaced on `last_error_code` (§7 taxonomy, job-facing subset).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_error_code", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCode {
    EmailNotFound,
    PreprocessFailed,
    MistralFailed,
    ParseFailed,
    StoreFailed,
}

impl JobErrorCode {
    /// §7: only `EMAIL_NOT_FOUND` and `PREPROCESS_FAILED` are non-retryable.
    pub fn retryable(self) -> bool {
        !matches!(
            self,
            JobErrorCode::EmailNotFound | JobErrorCode::PreprocessFailed
        )
    }
}

/// Job type discriminator. The spec names exactly one value; kept as an enum
/// so a second job type can be added later without a column-type migration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Summarize,
}

pub const MAX_ATTEMPTS: i32 = 5;
const BACKOFF_BASE_MINUTES: i64 = 2;
const LEASE_TIMEOUT: Duration = Duration::minutes(10);

/// Backoff schedule (§4.2): the `k`-th failure (1-indexed) waits
/// `base * 2^(k-1)`; called with `attempts_before` = the number of attempts
/// already recorded prior to this failure, so `attempts_before=0` (the first
/// failure) yields 2m, `attempts_before=1` yields 4m, and so on: 2m, 4m, 8m, 16m.
pub fn backoff_for_attempt(attempts_before: i32) -> Duration {
    let minutes = BACKOFF_BASE_MINUTES * 2i64.pow(attempts_before.max(0) as u32);
    Duration::minutes(minutes)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, sqlx::FromRow)]
pub struct JobRecord {
    pub job_id: uuid::Uuid,
    pub job_type: JobType,
    pub account_id: String,
    pub provider_message_id: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub run_after: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error_code: Option<JobErrorCode>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job claimed by a worker, trimmed to what `process(job)` (C9) needs.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: uuid::Uuid,
    pub account_id: String,
    pub provider_message_id: String,
    pub attempts: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct JobStatusCount {
    pub status: JobStatus,
    pub count: i64,
}

pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `enqueue` (§4.2): idempotent on `(job_type, account_id, provider_message_id)`.
    /// Returns the job's id whether it was freshly inserted or already existed.
    pub async fn enqueue(
        &self,
        account_id: &str,
        provider_message_id: &str,
    ) -> Result<uuid::Uuid, sqlx::Error> {
        let row: (uuid::Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO ai_jobs (job_id, job_type, account_id, provider_message_id, status, attempts, run_after)
            VALUES (gen_random_uuid(), 'summarize', $1, $2, 'queued', 0, NOW())
            ON CONFLICT (job_type, account_id, provider_message_id)
            DO UPDATE SET account_id = EXCLUDED.account_id
            RETURNING job_id
            "#,
        )
        .bind(account_id)
        .bind(provider_message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// `claim` (§4.2): atomically selects up to `batch` claimable jobs — either
    /// `queued` with `run_after <= now`, or `running` with an expired lease —
    /// via `FOR UPDATE SKIP LOCKED` so concurrent workers never block on each
    /// other, only skip rows already being claimed.
    pub async fn claim(&self, worker_id: &str, batch: i64) -> Result<Vec<ClaimedJob>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let lease_cutoff = Utc::now() - LEASE_TIMEOUT;

        let rows: Vec<(uuid::Uuid, String, String, i32)> = sqlx::query_as(
            r#"
            SELECT job_id, account_id, provider_message_id, attempts
            FROM ai_jobs
            WHERE (status = 'queued' AND run_after <= NOW())
               OR (status = 'running' AND locked_at < $2)
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(batch)
        .bind(lease_cutoff)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<uuid::Uuid> = rows.iter().map(|r| r.0).collect();
        sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = 'running', locked_by = $1, locked_at = NOW(), updated_at = NOW()
            WHERE job_id = ANY($2)
            "#,
        )
        .bind(worker_id)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|(job_id, account_id, provider_message_id, attempts)| ClaimedJob {
                job_id,
                account_id,
                provider_message_id,
                attempts,
            })
            .collect())
    }

    /// `mark_succeeded` (§4.2): verifies exactly one row was transitioned;
    /// zero rows means the lease was lost to a reclaiming worker.
    pub async fn mark_succeeded(&self, job_id: uuid::Uuid) -> Result<(), MarkError> {
        let result = sqlx::query(
            "UPDATE ai_jobs SET status = 'succeeded', updated_at = NOW() WHERE job_id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(MarkError::Database)?;

        if result.rows_affected() == 0 {
            return Err(MarkError::LostLease(job_id));
        }

        Ok(())
    }

    /// `mark_failed` (§4.2): retryable failures re-queue with a backoff delay;
    /// exhausted or non-retryable failures dead-letter the job.
    pub async fn mark_failed(
        &self,
        job_id: uuid::Uuid,
        error_code: JobErrorCode,
        attempts_before: i32,
    ) -> Result<JobStatus, sqlx::Error> {
        let next_attempts = attempts_before + 1;

        if error_code.retryable() && next_attempts < MAX_ATTEMPTS {
            let run_after = Utc::now() + backoff_for_attempt(attempts_before);
            sqlx::query(
                r#"
                UPDATE ai_jobs
                SET status = 'queued', attempts = $1, run_after = $2,
                    locked_by = NULL, locked_at = NULL,
                    last_error_code = $3, last_error_at = NOW(), updated_at = NOW()
                WHERE job_id = $4
                "#,
            )
            .bind(next_attempts)
            .bind(run_after)
            .bind(error_code)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            Ok(JobStatus::Queued)
        } else {
            sqlx::query(
                r#"
                UPDATE ai_jobs
                SET status = 'dead', attempts = $1,
                    locked_by = NULL, locked_at = NULL,
                    last_error_code = $2, last_error_at = NOW(), updated_at = NOW()
                WHERE job_id = $3
                "#,
            )
            .bind(next_attempts)
            .bind(error_code)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            Ok(JobStatus::Dead)
        }
    }

    /// Refresh the lease on a job still legitimately in progress, extending
    /// its visibility window without completing it.
    pub async fn heartbeat(&self, job_id: uuid::Uuid, worker_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE ai_jobs SET locked_at = NOW() WHERE job_id = $1 AND locked_by = $2 AND status = 'running'",
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Observability: counts by status (§4.2).
    pub async fn counts_by_status(&self) -> Result<Vec<JobStatusCount>, sqlx::Error> {
        sqlx::query_as("SELECT status, COUNT(*) AS count FROM ai_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_job(&self, job_id: uuid::Uuid) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM ai_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_jobs(
        &self,
        statuses: &[JobStatus],
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<JobRecord>, i64), sqlx::Error> {
        let page = page.max(1);
        let size = page_size.clamp(1, 100);
        let offset = (page - 1) * size;

        let mut count_builder = QueryBuilder::new("SELECT COUNT(*) FROM ai_jobs");
        apply_status_filter(&mut count_builder, statuses);
        let total = count_builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut data_builder = QueryBuilder::new("SELECT * FROM ai_jobs");
        apply_status_filter(&mut data_builder, statuses);
        data_builder.push(" ORDER BY created_at DESC LIMIT ");
        data_builder.push_bind(size);
        data_builder.push(" OFFSET ");
        data_builder.push_bind(offset);

        let records = data_builder
            .build_query_as::<JobRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok((records, total))
    }

    /// Cancel a still-queued job. Running jobs are left to the lease-timeout
    /// path rather than interrupted mid-flight.
    pub async fn cancel_queued(&self, job_id: uuid::Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE ai_jobs SET status = 'dead', updated_at = NOW() WHERE job_id = $1 AND status = 'queued'")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn apply_status_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, statuses: &'a [JobStatus]) {
    if statuses.is_empty() {
        return;
    }
    builder.push(" WHERE status IN (");
    {
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(status);
        }
    }
    builder.push(")");
}

#[derive(Debug, thiserror::Error)]
pub enum MarkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("lost lease on job {0}")]
    LostLease(uuid::Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_spec_sequence() {
        // Sequence of waits: 2m, 4m, 8m, 16m, then dead (§4.2, P3).
        assert_eq!(backoff_for_attempt(0), Duration::minutes(2));
        assert_eq!(backoff_for_attempt(1), Duration::minutes(4));
        assert_eq!(backoff_for_attempt(2), Duration::minutes(8));
        assert_eq!(backoff_for_attempt(3), Duration::minutes(16));
    }

    #[test]
    fn error_code_retryability_matches_taxonomy() {
        assert!(!JobErrorCode::EmailNotFound.retryable());
        assert!(!JobErrorCode::PreprocessFailed.retryable());
        assert!(JobErrorCode::MistralFailed.retryable());
        assert!(JobErrorCode::ParseFailed.retryable());
        assert!(JobErrorCode::StoreFailed.retryable());
    }
}
