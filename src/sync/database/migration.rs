//! Database migration management and startup fail-fast check (§6).
//!
//! Migrations are idempotent — running them multiple times is safe.

use sqlx::PgPool;

/// Schema version this build expects. Bumped whenever a migration changes the
/// shape of a core-owned table.
pub const EXPECTED_SCHEMA_VERSION: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SchemaCheckError {
    #[error("database error while checking schema version: {0}")]
    Database(#[from] sqlx::Error),
    #[error("schema_version row is absent; migrations have not been applied")]
    MissingVersionRow,
    #[error("schema_version is {found}, this build expects {expected}")]
    VersionMismatch { found: i32, expected: i32 },
}

/// Run database migrations. Idempotent: already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("running database migrations");

    sqlx::migrate!("./migrations").run(pool).await?;

    log::info!("database migrations completed");
    Ok(())
}

/// Startup fail-fast check (§6): if the expected `schema_version` row is
/// absent or stale, refuse to finish booting rather than run against a schema
/// this build does not understand.
pub async fn check_schema_version(pool: &PgPool) -> Result<(), SchemaCheckError> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await?;

    match row {
        None => Err(SchemaCheckError::MissingVersionRow),
        Some((found,)) if found != EXPECTED_SCHEMA_VERSION => {
            Err(SchemaCheckError::VersionMismatch {
                found,
                expected: EXPECTED_SCHEMA_VERSION,
            })
        }
        Some(_) => Ok(()),
    }
}

/// Reset database by dropping and recreating all core-owned tables.
///
/// **WARNING**: this drops all data. Used only by the admin reset endpoint and
/// by tests that need a guaranteed-empty schema.
pub async fn reset_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("resetting database schema");

    for table in [
        "ai_jobs",
        "email_ai_summaries",
        "emails",
        "gmail_sync_state",
        "audit_log",
        "sync_policy",
        "schema_version",
        "_sqlx_migrations",
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(pool)
            .await?;
    }

    log::info!("all tables dropped, running migrations");

    sqlx::migrate!("./migrations").run(pool).await?;

    log::info!("database schema created via migrations");
    Ok(())
}
