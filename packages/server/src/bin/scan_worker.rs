// Main entry point for the scan worker: HTTP API plus the periodic poll tick

use anyhow::{Context, Result};
use scan_engine::PostgresStore;
use scan_server::{
    kernel::{build_collaborators, start_scheduler, ServerDeps},
    server::{build_app, AppState},
    Config,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scan_server=debug,scan_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting scan worker");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let engine_config = config.engine_config()?;
    tracing::info!(
        fan_out = engine_config.fan_out,
        batch_limit = engine_config.poll_batch_limit,
        max_step_secs = engine_config.max_step_duration.as_secs(),
        "Configuration loaded"
    );

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Wire the engine
    let store = Arc::new(PostgresStore::from_pool(pool.clone()));
    let collaborators = build_collaborators(&config)?;
    let deps = ServerDeps::new(store.clone(), &collaborators, engine_config);

    let mut scheduler = start_scheduler(
        deps.poller.clone(),
        Duration::from_secs(config.poll_interval_secs.max(1)),
    )
    .await
    .context("Failed to start scheduler")?;

    // Build application
    let app = build_app(AppState::new(deps.store.clone()).with_pool(pool));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down scheduler");
    scheduler.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
