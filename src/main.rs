use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod classify;
mod db;
mod draft;
mod llm;
mod models;
mod render;
mod run;
mod summary;

#[derive(Parser)]
#[command(name = "teachmo-weekly-brief")]
#[command(about = "Weekly family brief generator for Teachmo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Generate briefs for every eligible family in one week
    #[command(group(
        ArgGroup::new("scope")
            .args(["school", "org"])
            .multiple(false)
    ))]
    Run {
        /// Any date inside the target week; defaults to today
        #[arg(long)]
        week: Option<NaiveDate>,
        /// Generate without persisting or notifying
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        school: Option<Uuid>,
        #[arg(long)]
        org: Option<Uuid>,
        #[arg(long, default_value = "manual")]
        trigger: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Run {
            week,
            dry_run,
            limit,
            school,
            org,
            trigger,
        } => {
            let store = db::PgStore::new(pool);
            let llm = llm::OpenAiClient::from_env()?;
            let options = run::RunOptions {
                week_of: week,
                dry_run,
                limit,
                trigger,
                scope: run::RunScope {
                    organization_id: org,
                    school_id: school,
                },
                created_by_user_id: None,
                created_by_role: None,
            };

            let outcome = run::run_weekly_briefs(&store, &llm, &options).await?;

            println!(
                "Run {} covered {} – {}: {} of {} families generated{}.",
                outcome.run_id,
                outcome.week_start,
                outcome.week_end,
                outcome.generated,
                outcome.results.len(),
                if dry_run { " (dry run)" } else { "" }
            );
            for result in &outcome.results {
                match (&result.error, &result.saved_id) {
                    (Some(error), _) => println!(
                        "- {}/{}: FAILED ({error})",
                        result.parent_user_id, result.child_id
                    ),
                    (None, Some(saved_id)) => println!(
                        "- {}/{}: saved {} (state {}{})",
                        result.parent_user_id,
                        result.child_id,
                        saved_id,
                        result.ux_state.as_deref().unwrap_or("?"),
                        if result.used_fallback { ", fallback" } else { "" }
                    ),
                    (None, None) => println!(
                        "- {}/{}: generated (state {}{})",
                        result.parent_user_id,
                        result.child_id,
                        result.ux_state.as_deref().unwrap_or("?"),
                        if result.used_fallback { ", fallback" } else { "" }
                    ),
                }
            }
        }
    }

    Ok(())
}
