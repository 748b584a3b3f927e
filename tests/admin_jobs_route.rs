use rocket::http::Status;
use rocket::routes;
use triage_api::models::{DataResponse, PaginatedResponse};
use triage_api::routes::admin::{job_counts, list_jobs};
use triage_api::sync::queue::JobRecord;
use triage_api::test_support::{TestDatabase, TestDatabaseError, TestFixtures, TestRocketBuilder};

#[tokio::test]
async fn listing_jobs_reflects_a_freshly_enqueued_job() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping admin jobs test: TEST_DATABASE_URL not set");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };

    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    fixtures
        .insert_job("acct-1", "msg-1")
        .await
        .expect("insert job");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_admin_routes(routes![list_jobs, job_counts])
        .async_client()
        .await;

    let response = client.get("/admin/v1/jobs").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let body: PaginatedResponse<JobRecord> = response.into_json().await.expect("valid JSON");
    assert_eq!(body.page.total_elements, 1);
    assert_eq!(body.data[0].account_id, "acct-1");
    assert_eq!(body.data[0].provider_message_id, "msg-1");

    let counts_response = client.get("/admin/v1/jobs/counts").dispatch().await;
    assert_eq!(counts_response.status(), Status::Ok);

    let _counts: DataResponse<Vec<triage_api::sync::queue::JobStatusCount>> =
        counts_response.into_json().await.expect("valid JSON");

    test_db.close().await.expect("failed to drop test database");
}
