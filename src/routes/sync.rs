//! Sync Trigger API (C11): on-demand handle to run a sync pass, and the
//! manual-enqueue/summary-fetch endpoints that round out the external
//! HTTP contract (§6).

use rocket::serde::json::Json;
use rocket::State;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::openapi;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::TriageDb;
use crate::error::ApiError;
use crate::models::{
    EnqueueStatus, EnqueueSummaryResponse, SummaryFetchResponse, SummaryFetchStatus, SyncNowResponse,
};
use crate::sync::queue::JobQueue;
use crate::sync::SyncEngine;

/// `POST /api/sync-now`: trigger one C7 pass for `account_id`.
#[openapi(tag = "Sync")]
#[post("/sync-now?<account_id>")]
pub async fn sync_now(
    account_id: String,
    engine: &State<Arc<SyncEngine>>,
) -> Result<Json<SyncNowResponse>, ApiError> {
    let result = engine
        .sync(&account_id)
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(result))
}

/// `POST /api/emails/{provider_message_id}/summarize`: idempotent manual enqueue (C5).
#[openapi(tag = "Sync")]
#[post("/emails/<provider_message_id>/summarize?<account_id>")]
pub async fn enqueue_summary(
    provider_message_id: String,
    account_id: String,
    config: &State<AppConfig>,
    queue: &State<JobQueue>,
) -> Result<Json<EnqueueSummaryResponse>, ApiError> {
    if config.llm_api_key.is_none() {
        return Ok(Json(EnqueueSummaryResponse {
            status: EnqueueStatus::NoKey,
            job_id: None,
        }));
    }

    let job_id = queue
        .enqueue(&account_id, &provider_message_id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(EnqueueSummaryResponse {
        status: EnqueueStatus::Queued,
        job_id: Some(job_id),
    }))
}

/// `GET /api/emails/{provider_message_id}/summary`: single summary fetch.
#[openapi(tag = "Sync")]
#[get("/emails/<provider_message_id>/summary?<account_id>")]
pub async fn get_summary(
    provider_message_id: String,
    account_id: String,
    mut db: Connection<TriageDb>,
) -> Result<Json<SummaryFetchResponse>, ApiError> {
    let row: Option<(serde_json::Value, String, String)> = sqlx::query_as(
        "SELECT summary_struct, summary_text, model FROM email_ai_summaries \
         WHERE account_id = $1 AND provider_message_id = $2 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(&account_id)
    .bind(&provider_message_id)
    .fetch_optional(&mut **db)
    .await?;

    Ok(Json(match row {
        Some((summary_json, summary_text, model)) => SummaryFetchResponse {
            status: SummaryFetchStatus::Ready,
            summary_json: Some(summary_json),
            summary_text: Some(summary_text),
            model: Some(model),
        },
        None => SummaryFetchResponse {
            status: SummaryFetchStatus::Pending,
            summary_json: None,
            summary_text: None,
            model: None,
        },
    }))
}
