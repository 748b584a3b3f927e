//! Administrative surface (§6): job inspection/cancellation, policy
//! get/patch, and a database status probe. No authentication guard — unlike
//! the teacher's `RequireAdmin`-gated surface, this core has no user/session
//! model of its own; deployments are expected to restrict this mount at the
//! network/gateway layer.

use rocket::serde::json::Json;
use rocket::State;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::db::TriageDb;
use crate::error::ApiError;
use crate::models::{DataResponse, PaginatedResponse, SyncPolicy};
use crate::sync::queue::{JobQueue, JobRecord, JobStatus, JobStatusCount};

fn parse_job_id(raw: &str) -> Result<uuid::Uuid, ApiError> {
    uuid::Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid job id {raw}")))
}

fn parse_status(raw: &str) -> Result<JobStatus, ApiError> {
    match raw.to_ascii_lowercase().as_str() {
        "queued" => Ok(JobStatus::Queued),
        "running" => Ok(JobStatus::Running),
        "succeeded" => Ok(JobStatus::Succeeded),
        "failed" => Ok(JobStatus::Failed),
        "dead" => Ok(JobStatus::Dead),
        other => Err(ApiError::BadRequest(format!("unknown job status '{other}'"))),
    }
}

/// `GET /admin/v1/jobs`: paginated listing, optionally filtered by status.
#[openapi(tag = "Admin - Jobs")]
#[get("/jobs?<status>&<page>&<page_size>")]
pub async fn list_jobs(
    status: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<PaginatedResponse<JobRecord>>, ApiError> {
    let statuses = match status {
        Some(raw) => vec![parse_status(&raw)?],
        None => Vec::new(),
    };
    let page = page.unwrap_or(1);
    let page_size = page_size.unwrap_or(25);

    let queue = JobQueue::new(pool.inner().clone());
    let (records, total) = queue.list_jobs(&statuses, page, page_size).await?;

    Ok(Json(PaginatedResponse::new(records, page, page_size, total)))
}

/// `GET /admin/v1/jobs/{job_id}`.
#[openapi(tag = "Admin - Jobs")]
#[get("/jobs/<job_id>")]
pub async fn get_job(
    job_id: &str,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<JobRecord>>, ApiError> {
    let job_id = parse_job_id(job_id)?;
    let queue = JobQueue::new(pool.inner().clone());
    let job = queue
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    Ok(Json(DataResponse { data: job }))
}

/// Request body for `PATCH /admin/v1/jobs/{job_id}`. The only supported
/// action is cancelling a still-`queued` job — running jobs are left to the
/// lease-timeout path (§4.2) rather than interrupted mid-flight.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateJobRequest {
    pub action: String,
}

/// `PATCH /admin/v1/jobs/{job_id}`.
#[openapi(tag = "Admin - Jobs")]
#[patch("/jobs/<job_id>", data = "<request>")]
pub async fn patch_job(
    job_id: &str,
    request: Json<UpdateJobRequest>,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<JobRecord>>, ApiError> {
    let job_id = parse_job_id(job_id)?;
    let queue = JobQueue::new(pool.inner().clone());

    match request.into_inner().action.as_str() {
        "cancel" => {
            let cancelled = queue.cancel_queued(job_id).await?;
            if !cancelled {
                return Err(ApiError::BadRequest(
                    "job cannot be cancelled in its current state".to_string(),
                ));
            }
        }
        other => return Err(ApiError::BadRequest(format!("unsupported action '{other}'"))),
    }

    let job = queue
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    Ok(Json(DataResponse { data: job }))
}

/// `GET /admin/v1/jobs/counts`.
#[openapi(tag = "Admin - Jobs")]
#[get("/jobs/counts")]
pub async fn job_counts(
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<Vec<JobStatusCount>>>, ApiError> {
    let queue = JobQueue::new(pool.inner().clone());
    let counts = queue.counts_by_status().await?;
    Ok(Json(DataResponse { data: counts }))
}

/// `GET /admin/v1/policy`.
#[openapi(tag = "Admin - Policy")]
#[get("/policy")]
pub async fn get_policy(
    mut db: Connection<TriageDb>,
) -> Result<Json<DataResponse<SyncPolicy>>, ApiError> {
    let policy: SyncPolicy = sqlx::query_as(
        "SELECT worker_enabled, max_emails_per_cycle, updated_at FROM sync_policy LIMIT 1",
    )
    .fetch_one(&mut **db)
    .await?;

    Ok(Json(DataResponse { data: policy }))
}

/// Request body for `PATCH /admin/v1/policy`. Both fields are optional;
/// omitted fields are left unchanged.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdatePolicyRequest {
    pub worker_enabled: Option<bool>,
    pub max_emails_per_cycle: Option<i32>,
}

/// `PATCH /admin/v1/policy`: takes effect at the next cycle, with no
/// transactional coupling to in-flight job records (§3 Global policy).
#[openapi(tag = "Admin - Policy")]
#[patch("/policy", data = "<request>")]
pub async fn patch_policy(
    request: Json<UpdatePolicyRequest>,
    mut db: Connection<TriageDb>,
) -> Result<Json<DataResponse<SyncPolicy>>, ApiError> {
    let request = request.into_inner();

    let policy: SyncPolicy = sqlx::query_as(
        r#"
        UPDATE sync_policy
        SET worker_enabled = COALESCE($1, worker_enabled),
            max_emails_per_cycle = COALESCE($2, max_emails_per_cycle),
            updated_at = NOW()
        RETURNING worker_enabled, max_emails_per_cycle, updated_at
        "#,
    )
    .bind(request.worker_enabled)
    .bind(request.max_emails_per_cycle)
    .fetch_one(&mut **db)
    .await?;

    Ok(Json(DataResponse { data: policy }))
}

/// Response shape for `GET /admin/v1/database/status`.
#[derive(Debug, Serialize, JsonSchema)]
pub struct DatabaseStatusResponse {
    pub schema_version: i32,
    pub total_emails: i64,
    pub total_jobs: i64,
    pub total_summaries: i64,
    pub total_audit_log_rows: i64,
}

/// `GET /admin/v1/database/status`.
#[openapi(tag = "Admin - Database")]
#[get("/database/status")]
pub async fn database_status(
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<DatabaseStatusResponse>>, ApiError> {
    let (schema_version, total_emails, total_jobs, total_summaries, total_audit_log_rows) = tokio::try_join!(
        async {
            sqlx::query_as::<_, (i32,)>("SELECT version FROM schema_version LIMIT 1")
                .fetch_one(pool.inner())
                .await
        },
        async {
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM emails")
                .fetch_one(pool.inner())
                .await
        },
        async {
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM ai_jobs")
                .fetch_one(pool.inner())
                .await
        },
        async {
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM email_ai_summaries")
                .fetch_one(pool.inner())
                .await
        },
        async {
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM audit_log")
                .fetch_one(pool.inner())
                .await
        },
    )?;

    Ok(Json(DataResponse {
        data: DatabaseStatusResponse {
            schema_version: schema_version.0,
            total_emails: total_emails.0,
            total_jobs: total_jobs.0,
            total_summaries: total_summaries.0,
            total_audit_log_rows: total_audit_log_rows.0,
        },
    }))
}
