//! Request helpers and an in-memory app for route tests.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use scan_engine::MemoryStore;
use scan_server::server::{build_app, AppState};
use serde_json::Value;
use tower::ServiceExt;

/// App over a fresh in-memory store.
pub fn memory_app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let app = build_app(AppState::new(store.clone()));
    (app, store)
}

/// Send one request and return the status and JSON body (`Null` when empty).
pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub fn scan_request(domain: &str) -> Value {
    serde_json::json!({
        "project_id": uuid::Uuid::new_v4(),
        "domain": domain,
        "business_name": "Acme Plumbing",
        "notification_recipient": "owner@acme.test",
    })
}
