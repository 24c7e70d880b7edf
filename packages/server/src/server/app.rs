use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use scan_engine::JobStore;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::routes::{cancel_scan_handler, create_scan_handler, health_handler, scan_status_handler};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    /// Present when backed by Postgres; used by the health check.
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            db_pool: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/scans", post(create_scan_handler))
        .route("/scans/:id/status", get(scan_status_handler))
        .route("/scans/:id/cancel", post(cancel_scan_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
