#[macro_use]
extern crate rocket;

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod preprocess;
pub mod provider;
pub mod request_logger;
pub mod routes;
pub mod sync;
pub mod worker;

use crate::config::AppConfig;
use crate::credentials::{CredentialAccessor, StaticCredentialAccessor};
use crate::db::TriageDb;
use crate::events::EventFabric;
use crate::provider::{HttpProviderAdapter, ProviderAdapter};
use crate::request_logger::RequestLogger;
use crate::sync::{JobQueue, SyncDispatcher, SyncEngine};
use crate::worker::llm_client::MODEL_NAME;
use crate::worker::{LlmClient, Worker, WorkerConfig};
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::{sqlx, Database};
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let config = AppConfig::from_env().expect("invalid configuration");

    log::info!("starting triage API server");

    let cors = CorsOptions::default()
        .allowed_origins(if config.cors_allowed_origins.iter().any(|o| o == "*") {
            AllowedOrigins::all()
        } else {
            AllowedOrigins::some_exact(&config.cors_allowed_origins)
        })
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("error creating CORS");

    // A single DATABASE_URL (§6) drives both our own config and the pool
    // rocket_db_pools manages, rather than requiring operators to also set
    // the JSON-shaped ROCKET_DATABASES rocket_db_pools expects by default.
    let figment =
        rocket::Config::figment().merge(("databases.triage_db.url", config.database_url.clone()));

    let credentials: Arc<dyn CredentialAccessor> = Arc::new(StaticCredentialAccessor::from_env());
    let provider: Arc<dyn ProviderAdapter> = Arc::new(HttpProviderAdapter::new(
        config.provider_api_base_url.clone(),
        reqwest::Client::new(),
    ));
    let events = EventFabric::new();

    rocket::custom(figment)
        .attach(RequestLogger)
        .attach(TriageDb::init())
        .attach(cors)
        .manage(config.clone())
        .manage(Arc::clone(&credentials))
        .manage(events.clone())
        // Migrations run before the schema-version fail-fast check (§6): a
        // stale schema refuses to finish booting rather than run degraded.
        .attach(AdHoc::try_on_ignite(
            "Run Migrations And Check Schema",
            |rocket| async move {
                let pool = match TriageDb::fetch(&rocket) {
                    Some(db) => (**db).clone(),
                    None => {
                        log::error!("database pool not available for migrations");
                        return Err(rocket);
                    }
                };

                if let Err(e) = sync::run_migrations(&pool).await {
                    log::error!("database migrations failed: {e}");
                    return Err(rocket);
                }
                if let Err(e) = sync::check_schema_version(&pool).await {
                    log::error!("schema version check failed: {e}");
                    return Err(rocket);
                }

                Ok(rocket.manage(pool))
            },
        ))
        .attach(AdHoc::try_on_ignite(
            "Build Sync Engine And Job Queue",
            move |rocket| async move {
                let pool = match rocket.state::<sqlx::PgPool>() {
                    Some(pool) => pool.clone(),
                    None => {
                        log::error!("database pool not managed; cannot build sync engine");
                        return Err(rocket);
                    }
                };
                let credentials = rocket
                    .state::<Arc<dyn CredentialAccessor>>()
                    .expect("credential accessor managed above")
                    .clone();
                let events = rocket
                    .state::<EventFabric>()
                    .expect("event fabric managed above")
                    .clone();

                let engine = Arc::new(SyncEngine::new(pool.clone(), credentials, provider, events));
                let queue = JobQueue::new(pool);

                Ok(rocket.manage(engine).manage(queue))
            },
        ))
        .attach(AdHoc::on_liftoff("Spawn Background Workers", |rocket| {
            Box::pin(async move {
                let config = rocket
                    .state::<AppConfig>()
                    .expect("config managed above")
                    .clone();

                if !config.worker_mode {
                    log::info!(
                        "WORKER_MODE disabled; background sync and summarizer loops will not run in this process"
                    );
                    return;
                }

                match (
                    rocket.state::<sqlx::PgPool>(),
                    rocket.state::<Arc<dyn CredentialAccessor>>(),
                    rocket.state::<Arc<SyncEngine>>(),
                ) {
                    (Some(pool), Some(credentials), Some(engine)) => {
                        let dispatcher =
                            SyncDispatcher::new(pool.clone(), credentials.clone(), engine.clone());
                        tokio::spawn(async move {
                            log::info!("starting sync dispatcher");
                            dispatcher.run().await;
                        });
                    }
                    _ => log::error!("failed to spawn sync dispatcher: missing managed state"),
                }

                if !config.ai_summ_enabled {
                    log::info!("AI_SUMM_ENABLED disabled; summarizer worker will not run");
                    return;
                }

                match (rocket.state::<sqlx::PgPool>(), rocket.state::<EventFabric>()) {
                    (Some(pool), Some(events)) => {
                        let llm = match config.llm_api_key.clone() {
                            Some(api_key) => {
                                Some(LlmClient::new(config.llm_endpoint_url.clone(), api_key, MODEL_NAME))
                            }
                            None => {
                                log::warn!(
                                    "LLM_API_KEY unset; summarizer worker will run but dead-letter every claimed job"
                                );
                                None
                            }
                        };

                        let worker_config = WorkerConfig {
                            batch_size: config.ai_jobs_batch,
                            idle_sleep: config.ai_idle_sleep,
                            worker_id: format!("worker-{}", std::process::id()),
                            prompt_version: "v1".to_string(),
                            strip_reply_chains: config.strip_reply_chains,
                        };

                        let worker = Arc::new(Worker::new(pool.clone(), events.clone(), llm, worker_config));
                        tokio::spawn(async move {
                            log::info!("starting summarizer worker");
                            worker.run().await;
                        });
                    }
                    _ => log::error!("failed to spawn summarizer worker: missing managed state"),
                }
            })
        }))
        .mount(
            "/api",
            openapi_get_routes![
                routes::health::live_health,
                routes::health::ready_health,
                routes::accounts::list_accounts,
                routes::emails::list_emails,
                routes::emails::list_emails_with_summaries,
                routes::sync::sync_now,
                routes::sync::enqueue_summary,
                routes::sync::get_summary,
                routes::events::events_poll,
            ],
        )
        // `rocket_okapi` has no way to describe a WebSocket upgrade, so the
        // streaming transport is mounted as a plain route alongside it.
        .mount("/api", routes![routes::events::events_ws])
        .mount(
            "/admin/v1",
            openapi_get_routes![
                routes::admin::list_jobs,
                routes::admin::get_job,
                routes::admin::patch_job,
                routes::admin::job_counts,
                routes::admin::get_policy,
                routes::admin::patch_policy,
                routes::admin::database_status,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Triage API", "../../openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};

    pub use database::{TestDatabase, TestDatabaseError};

    /// Convenience helpers for seeding core tables in integration tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert an email row, returning its database id.
        pub async fn insert_email(
            &self,
            account_id: &str,
            provider_message_id: &str,
            subject: &str,
            body: &str,
        ) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar(
                r#"
                INSERT INTO emails (account_id, provider_message_id, subject, sender, received_at, body, is_html)
                VALUES ($1, $2, $3, 'sender@example.com', NOW(), $4, FALSE)
                RETURNING id
                "#,
            )
            .bind(account_id)
            .bind(provider_message_id)
            .bind(subject)
            .bind(body)
            .fetch_one(self.pool)
            .await
        }

        /// Enqueue a summarization job directly, bypassing the sync engine.
        pub async fn insert_job(
            &self,
            account_id: &str,
            provider_message_id: &str,
        ) -> Result<uuid::Uuid, sqlx::Error> {
            sqlx::query_scalar(
                r#"
                INSERT INTO ai_jobs (job_id, job_type, account_id, provider_message_id, status, attempts, run_after)
                VALUES (gen_random_uuid(), 'summarize', $1, $2, 'queued', 0, NOW())
                RETURNING job_id
                "#,
            )
            .bind(account_id)
            .bind(provider_message_id)
            .fetch_one(self.pool)
            .await
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::core::error::TestcontainersError;
        use testcontainers::core::WaitFor;
        use testcontainers::runners::AsyncRunner;
        use testcontainers::{ContainerAsync, GenericImage, ImageExt};
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Provision a fresh database by launching a disposable Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                Self::new().await
            }

            /// Provision a fresh database given a base connection string.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine").with_wait_for(
                    WaitFor::message_on_stderr("database system is ready to accept connections"),
                );

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions =
                    admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container: Some(container),
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled connection handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Re-run migrations to ensure schema freshness (idempotent).
            pub async fn reset(&self) -> Result<(), TestDatabaseError> {
                MIGRATOR.run(self.pool()).await?;
                Ok(())
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ =
                                drop_database_with_fallback(admin_options.clone(), &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ = drop_database_with_fallback(
                                        admin_options.clone(),
                                        &db_name,
                                    )
                                    .await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
            }
        }

        /// Mount routes under `/api`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api".to_string(), routes));
            self
        }

        /// Mount routes under `/admin/v1`.
        pub fn mount_admin_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/admin/v1".to_string(), routes));
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
