//! Sync Cursor Store (C4): per-account opaque cursor value.

use sqlx::PgPool;

/// Load the current cursor for `account_id`, if one has been recorded.
pub async fn load_cursor(pool: &PgPool, account_id: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT cursor_value FROM gmail_sync_state WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(value,)| value))
}

/// Advance the cursor for `account_id` to `cursor_value`.
///
/// Invariant (§3): callers must only invoke this after the batch the new
/// cursor demarcates has been durably committed — this function itself has no
/// way to enforce that, it only performs the upsert.
pub async fn advance_cursor(
    pool: &PgPool,
    account_id: &str,
    cursor_value: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO gmail_sync_state (account_id, cursor_value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (account_id)
        DO UPDATE SET cursor_value = EXCLUDED.cursor_value, updated_at = NOW()
        "#,
    )
    .bind(account_id)
    .bind(cursor_value)
    .execute(pool)
    .await?;

    Ok(())
}
