//! Request dispatch endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use base64::Engine;
use tracing::info;

use crate::error::BrokerError;
use crate::metrics::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::router::{ModelRouter, RoutedResponse, Target, TargetSpec, DEFAULT_IMAGE_MODEL};
use crate::providers::Provider;
use crate::state::AppState;
use crate::types::{
    AnalyzeImageRequest, AnalyzeImageResponse, AskRequest, AskResponse, ProviderTotals,
};

const DEFAULT_IMAGE_PROMPT: &str = "Analyze this image and describe what you see.";

/// Per-provider queue totals reported alongside every dispatch response.
pub(crate) async fn provider_totals(router: &ModelRouter) -> BTreeMap<String, ProviderTotals> {
    let mut totals = BTreeMap::new();
    for (provider, queues) in router.queues() {
        let mut total_queue_length = 0;
        for queue in queues {
            total_queue_length += queue.queuer.queue_length().await;
        }
        totals.insert(provider.to_string(), ProviderTotals { total_queue_length });
    }
    totals
}

fn observe(result: &Result<RoutedResponse, BrokerError>, started: Instant) {
    let (provider, status) = match result {
        Ok(routed) => (routed.provider.as_str(), "success"),
        Err(_) => ("unrouted", "error"),
    };
    REQUESTS_TOTAL.with_label_values(&[provider, status]).inc();
    REQUEST_DURATION_SECONDS
        .with_label_values(&[provider])
        .observe(started.elapsed().as_secs_f64());
}

/// Chat dispatch endpoint
///
/// POST /ask
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, BrokerError> {
    if request.history.is_empty() {
        return Err(BrokerError::InvalidRequest(
            "history must not be empty".to_string(),
        ));
    }

    info!(messages = request.history.len(), "Handling POST /ask");

    let router = state.current_router().await;
    let started = Instant::now();
    let result = router.dispatch_chat(&request.history, &request.model).await;
    observe(&result, started);
    let routed = result?;

    let providers = provider_totals(&router).await;
    Ok(Json(AskResponse {
        response: routed.text,
        provider: routed.provider,
        model: routed.model,
        providers,
    }))
}

/// Image analysis endpoint
///
/// POST /analyze-image
pub async fn analyze_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeImageRequest>,
) -> Result<Json<AnalyzeImageResponse>, BrokerError> {
    if base64::engine::general_purpose::STANDARD
        .decode(&request.image)
        .is_err()
    {
        return Err(BrokerError::InvalidRequest(
            "image must be valid base64".to_string(),
        ));
    }

    let prompt = request
        .prompt
        .unwrap_or_else(|| DEFAULT_IMAGE_PROMPT.to_string());
    let target = request.model.unwrap_or_else(|| {
        TargetSpec::One(Target {
            provider: Provider::Mistral,
            model: DEFAULT_IMAGE_MODEL.to_string(),
        })
    });

    info!(image_bytes = request.image.len(), "Handling POST /analyze-image");

    let router = state.current_router().await;
    let started = Instant::now();
    let result = router
        .dispatch_image(request.image, prompt, &target)
        .await;
    observe(&result, started);
    let routed = result?;

    let providers = provider_totals(&router).await;
    Ok(Json(AnalyzeImageResponse {
        analysis: routed.text,
        provider: routed.provider,
        model: routed.model,
        providers,
    }))
}
