//! Run a single poll tick and exit.
//!
//! For deployments where an external trigger (cron, a platform scheduler)
//! invokes the worker instead of the in-process scheduler.

use anyhow::{Context, Result};
use clap::Parser;
use scan_engine::PostgresStore;
use scan_server::{
    kernel::{build_collaborators, ServerDeps},
    Config,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "poll-tick")]
#[command(about = "Advance each eligible scan job by one step")]
struct Args {
    /// Maximum jobs selected this tick (overrides POLL_BATCH_LIMIT)
    #[arg(long)]
    limit: Option<usize>,

    /// Maximum jobs processed concurrently (overrides POLL_FAN_OUT)
    #[arg(long)]
    fan_out: Option<usize>,

    /// Skip running migrations before the tick
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scan_server=debug,scan_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(limit) = args.limit {
        config.poll_batch_limit = limit;
    }
    if let Some(fan_out) = args.fan_out {
        config.poll_fan_out = fan_out;
    }
    let engine_config = config.engine_config()?;

    let pool = PgPoolOptions::new()
        .max_connections((engine_config.fan_out as u32 + 1).max(2))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    if !args.skip_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
    }

    let store = Arc::new(PostgresStore::from_pool(pool));
    let collaborators = build_collaborators(&config)?;
    let deps = ServerDeps::new(store, &collaborators, engine_config);

    let report = deps.poller.tick().await.context("Poll tick failed")?;
    tracing::info!(
        selected = report.selected,
        advanced = report.advanced,
        completed = report.completed,
        retries = report.retries_scheduled,
        failed = report.failed,
        skipped = report.skipped,
        lock_lost = report.lock_lost,
        errors = report.errors,
        "Poll tick complete"
    );

    Ok(())
}
