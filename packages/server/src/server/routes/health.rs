use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

use crate::server::app::AppState;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    /// Record store backend: `postgres` or `memory`.
    store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn ping(pool: &PgPool) -> Result<(), String> {
    match tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("query failed: {}", e)),
        Err(_) => Err(format!("no answer within {}s", PING_TIMEOUT.as_secs())),
    }
}

/// `GET /health`: 200 while the record store answers, 503 otherwise.
///
/// The in-memory store always answers.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let (store, checked) = match state.db_pool.as_ref() {
        Some(pool) => ("postgres", ping(pool).await),
        None => ("memory", Ok(())),
    };

    match checked {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                store,
                error: None,
            }),
        ),
        Err(error) => {
            warn!(store, %error, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    store,
                    error: Some(error),
                }),
            )
        }
    }
}
