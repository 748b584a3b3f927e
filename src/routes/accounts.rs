//! `GET /api/accounts`: the set of accounts the Credential Accessor currently
//! holds tokens for. The core owns no `accounts` table of its own — account
//! lifecycle is entirely external (§3) — so this is a thin pass-through.

use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use std::sync::Arc;

use crate::credentials::CredentialAccessor;
use crate::models::{AccountSummary, AccountsResponse};

#[openapi(tag = "Accounts")]
#[get("/accounts")]
pub async fn list_accounts(
    credentials: &State<Arc<dyn CredentialAccessor>>,
) -> Json<AccountsResponse> {
    let accounts = credentials
        .list_accounts()
        .await
        .into_iter()
        .map(|account_id| AccountSummary {
            account_id,
            connected: true,
        })
        .collect();

    Json(AccountsResponse { accounts })
}
