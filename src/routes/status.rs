//! Introspection endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::tokens::estimate_tokens as estimate;
use crate::types::{
    QueueStatus, QueueStatusResponse, QueueUsage, TokenEstimateResponse, UsageResponse,
    UsageTotals,
};

/// Queue overview endpoint
///
/// GET /queue/status
pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatusResponse> {
    let router = state.current_router().await;
    let mut providers = BTreeMap::new();
    let mut total_queue_length = 0;

    for (provider, queues) in router.queues() {
        let mut statuses = Vec::with_capacity(queues.len());
        for queue in queues {
            let queue_length = queue.queuer.queue_length().await;
            total_queue_length += queue_length;
            statuses.push(QueueStatus {
                label: queue.queuer.label().to_string(),
                queue_length,
                processing: queue.queuer.is_processing().await,
                estimated_exec_ms: queue.queuer.estimated_exec_ms().await,
            });
        }
        providers.insert(provider.to_string(), statuses);
    }

    Json(QueueStatusResponse {
        providers,
        total_queue_length,
    })
}

/// Usage snapshot endpoint
///
/// GET /usage
pub async fn usage(State(state): State<Arc<AppState>>) -> Json<UsageResponse> {
    let router = state.current_router().await;
    let mut queues = Vec::new();
    let mut totals = UsageTotals::default();

    for (provider, provider_queues) in router.queues() {
        for queue in provider_queues {
            let models = queue.queuer.usage_snapshot().await;
            for snapshot in models.values() {
                totals.month_requests += snapshot.month.requests.count;
                totals.month_tokens += snapshot.month.tokens.count;
                totals.requests_last_minute += snapshot.requests_last_minute;
            }
            queues.push(QueueUsage {
                provider: *provider,
                label: queue.queuer.label().to_string(),
                models,
            });
        }
    }

    Json(UsageResponse { queues, totals })
}

/// Known-model listing endpoint
///
/// GET /models
pub async fn models(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, Vec<String>>> {
    let router = state.current_router().await;
    Json(
        router
            .models()
            .into_iter()
            .map(|(provider, names)| (provider.to_string(), names))
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
pub struct TokenEstimateQuery {
    pub text: Option<String>,
    pub model: Option<String>,
}

/// Token estimation endpoint
///
/// GET /estimate-tokens?text=&model=
pub async fn estimate_tokens(
    Query(query): Query<TokenEstimateQuery>,
) -> Json<TokenEstimateResponse> {
    let text = query.text.unwrap_or_default();
    Json(TokenEstimateResponse {
        model: query.model,
        text_length: text.chars().count(),
        estimated_tokens: estimate(&text),
    })
}
