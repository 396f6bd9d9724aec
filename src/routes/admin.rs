//! Administrative endpoints.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::error::BrokerError;
use crate::router::ReloadSelector;
use crate::state::AppState;
use crate::types::{ReloadResponse, ReloadedProvider};

#[derive(Debug, Deserialize)]
pub struct ReloadQuery {
    pub provider: Option<String>,
}

/// Key reload endpoint
///
/// POST /admin/reload-keys?provider=mistral|gemini|all
pub async fn reload_keys(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReloadQuery>,
) -> Result<Json<ReloadResponse>, BrokerError> {
    let raw = query.provider.as_deref().unwrap_or("all");
    let selector = ReloadSelector::parse(raw).ok_or_else(|| {
        BrokerError::InvalidRequest(format!("unknown provider selector: {raw}"))
    })?;

    info!(selector = raw, "Handling POST /admin/reload-keys");

    let current = state.current_router().await;
    let (next, summary) = current.reload(selector, &state.config).await?;
    *state.router.write().await = Arc::new(next);

    Ok(Json(ReloadResponse {
        reloaded: summary
            .into_iter()
            .map(|(provider, queues)| ReloadedProvider { provider, queues })
            .collect(),
    }))
}
