//! Administrative CLI to drop and recreate the core schema against a target
//! database. Grounded on the teacher's `create_user` bin: a `clap`-parsed,
//! `DATABASE_URL`-driven one-shot operation with no HTTP surface of its own.

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::io::{self, Write};

#[derive(Parser, Debug)]
#[command(
    name = "reset_db",
    about = "Drop and recreate the triage core schema (emails, ai_jobs, summaries, ...)"
)]
struct Args {
    /// Skip the interactive confirmation prompt.
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    if !args.yes {
        print!("This will drop every core table and all data. Continue? [y/N] ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("aborted");
            return Ok(());
        }
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    triage_api::sync::reset_database(&pool).await?;

    println!("schema reset complete");
    Ok(())
}
