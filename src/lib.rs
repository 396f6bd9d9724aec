//! LLM Broker Library
//!
//! Provider-aware request broker that fronts several remote LLM APIs,
//! enforcing per-key, per-model rate limits while minimising observed
//! latency. Clients name one or more acceptable `(provider, model)`
//! targets; the broker picks the queue that will satisfy the request
//! soonest and dispatches when the limits allow.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod keys;
pub mod limiter;
pub mod limits;
pub mod metrics;
pub mod providers;
pub mod queuer;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod tokens;
pub mod types;
pub mod usage;

pub use config::BrokerConfig;
pub use state::AppState;

/// Initialize the Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Run the broker server.
///
/// Resolves keys, builds the routing engine and blocks serving HTTP until
/// shut down. Fails fast when no key can be resolved for the default
/// provider.
pub async fn run_server(config: BrokerConfig) -> anyhow::Result<()> {
    init_metrics();

    info!(
        port = config.port,
        usage_strategy = ?config.usage_strategy,
        keys_strategy = ?config.keys_strategy,
        "Starting LLM broker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let model_router = router::ModelRouter::from_config(&config).await?;
    let state = Arc::new(AppState::new(model_router, config.clone()));

    let app = Router::new()
        // Liveness
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .route("/metrics/prometheus", get(routes::metrics_prometheus))
        // Dispatch
        .route("/ask", post(routes::ask))
        .route("/analyze-image", post(routes::analyze_image))
        // Introspection
        .route("/queue/status", get(routes::queue_status))
        .route("/usage", get(routes::usage))
        .route("/models", get(routes::models))
        .route("/estimate-tokens", get(routes::estimate_tokens))
        // Administration
        .route("/admin/reload-keys", post(routes::reload_keys))
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("LLM broker listening on http://{}", addr);
    info!("Dispatch:  POST /ask, POST /analyze-image");
    info!("Status:    GET  /queue/status, /usage, /models");
    info!("Admin:     POST /admin/reload-keys?provider=mistral|gemini|all");

    axum::serve(listener, app).await?;

    Ok(())
}
