//! Liveness and metrics endpoints.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Service banner
///
/// GET /
pub async fn index() -> impl IntoResponse {
    Json(json!({
        "service": "llm-broker",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Prometheus metrics endpoint
///
/// GET /metrics/prometheus
pub async fn metrics_prometheus() -> impl IntoResponse {
    crate::metrics::gather_metrics()
}
