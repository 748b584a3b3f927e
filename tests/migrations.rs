use triage_api::sync;
use triage_api::test_support::{TestDatabase, TestDatabaseError};

#[tokio::test]
async fn migrations_apply_and_schema_version_checks_out() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping migrations test: TEST_DATABASE_URL not set");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };

    let pool = test_db.pool_clone();

    // TestDatabase::new already ran migrations once; running again must be a no-op.
    sync::run_migrations(&pool).await.expect("migrations rerun cleanly");
    sync::check_schema_version(&pool)
        .await
        .expect("schema version matches the compiled expectation");

    let core_tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' \
         AND table_name IN ('emails', 'gmail_sync_state', 'ai_jobs', 'email_ai_summaries', \
         'sync_policy', 'audit_log', 'schema_version')",
    )
    .fetch_one(&pool)
    .await
    .expect("lookup succeeded");

    assert_eq!(core_tables, 7, "all seven core tables should exist after migration");

    test_db.close().await.expect("failed to drop test database");
}
