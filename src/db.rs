use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("triage_db")]
pub struct TriageDb(sqlx::PgPool);
