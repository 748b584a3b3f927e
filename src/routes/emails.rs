//! Thin external-contract read endpoints (§6): a straight list of `emails`
//! and a joined read against `email_ai_summaries`. No business logic — the
//! Mailbox Sync Engine and Summarizer Worker own writes; these routes only read.

use rocket::serde::json::Json;
use rocket_db_pools::{sqlx, Connection};
use rocket_okapi::openapi;

use crate::db::TriageDb;
use crate::models::{DataResponse, Email, EmailWithSummary};

/// `GET /api/emails?account_id=`: list emails, optionally scoped to one account.
///
/// Returns an empty array rather than a 5xx on transient store errors where
/// possible (§7), since this is a read-only external-contract surface.
#[openapi(tag = "Emails")]
#[get("/emails?<account_id>")]
pub async fn list_emails(
    account_id: Option<String>,
    mut db: Connection<TriageDb>,
) -> Json<DataResponse<Vec<Email>>> {
    let result: Result<Vec<Email>, sqlx::Error> = match account_id {
        Some(account_id) => {
            sqlx::query_as("SELECT * FROM emails WHERE account_id = $1 ORDER BY received_at DESC")
                .bind(account_id)
                .fetch_all(&mut **db)
                .await
        }
        None => {
            sqlx::query_as("SELECT * FROM emails ORDER BY received_at DESC")
                .fetch_all(&mut **db)
                .await
        }
    };

    Json(DataResponse {
        data: result.unwrap_or_else(|e| {
            log::warn!("list_emails: query failed, returning empty: {e}");
            Vec::new()
        }),
    })
}

/// `GET /api/emails-with-summaries?account_id=`: joined read against the
/// Summary Store.
#[openapi(tag = "Emails")]
#[get("/emails-with-summaries?<account_id>")]
pub async fn list_emails_with_summaries(
    account_id: Option<String>,
    mut db: Connection<TriageDb>,
) -> Json<DataResponse<Vec<EmailWithSummary>>> {
    const QUERY: &str = r#"
        SELECT e.id, e.account_id, e.provider_message_id, e.thread_id, e.subject,
               e.sender, e.received_at, e.body, e.is_html, e.created_at,
               s.summary_text, s.summary_struct ->> 'urgency' AS urgency
        FROM emails e
        LEFT JOIN LATERAL (
            SELECT summary_text, summary_struct
            FROM email_ai_summaries
            WHERE email_ai_summaries.account_id = e.account_id
              AND email_ai_summaries.provider_message_id = e.provider_message_id
            ORDER BY created_at DESC
            LIMIT 1
        ) s ON TRUE
    "#;

    let result: Result<Vec<EmailWithSummary>, sqlx::Error> = match account_id {
        Some(account_id) => {
            sqlx::query_as(&format!("{QUERY} WHERE e.account_id = $1 ORDER BY e.received_at DESC"))
                .bind(account_id)
                .fetch_all(&mut **db)
                .await
        }
        None => {
            sqlx::query_as(&format!("{QUERY} ORDER BY e.received_at DESC"))
                .fetch_all(&mut **db)
                .await
        }
    };

    Json(DataResponse {
        data: result.unwrap_or_else(|e| {
            log::warn!("list_emails_with_summaries: query failed, returning empty: {e}");
            Vec::new()
        }),
    })
}
