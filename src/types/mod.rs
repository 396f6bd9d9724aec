//! HTTP API request and response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::limiter::BucketSnapshot;
use crate::providers::{ChatMessage, Provider};
use crate::router::TargetSpec;

/// POST /ask body
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub history: Vec<ChatMessage>,
    pub model: TargetSpec,
}

/// POST /ask response
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub response: String,
    pub provider: Provider,
    pub model: String,
    pub providers: BTreeMap<String, ProviderTotals>,
}

/// POST /analyze-image body
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeImageRequest {
    /// Base64-encoded image payload
    pub image: String,
    pub prompt: Option<String>,
    pub model: Option<TargetSpec>,
}

/// POST /analyze-image response
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeImageResponse {
    pub analysis: String,
    pub provider: Provider,
    pub model: String,
    pub providers: BTreeMap<String, ProviderTotals>,
}

/// Aggregate load of one provider's queues
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTotals {
    pub total_queue_length: usize,
}

/// One queue's state in GET /queue/status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub label: String,
    pub queue_length: usize,
    pub processing: bool,
    pub estimated_exec_ms: u64,
}

/// GET /queue/status response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    pub providers: BTreeMap<String, Vec<QueueStatus>>,
    pub total_queue_length: usize,
}

/// One queue's usage in GET /usage
#[derive(Debug, Clone, Serialize)]
pub struct QueueUsage {
    pub provider: Provider,
    pub label: String,
    pub models: BTreeMap<String, BucketSnapshot>,
}

/// Cross-queue aggregate in GET /usage
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub month_requests: u64,
    pub month_tokens: u64,
    pub requests_last_minute: usize,
}

/// GET /usage response
#[derive(Debug, Clone, Serialize)]
pub struct UsageResponse {
    pub queues: Vec<QueueUsage>,
    pub totals: UsageTotals,
}

/// GET /estimate-tokens response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEstimateResponse {
    pub model: Option<String>,
    pub text_length: usize,
    pub estimated_tokens: u64,
}

/// POST /admin/reload-keys response
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResponse {
    pub reloaded: Vec<ReloadedProvider>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadedProvider {
    pub provider: Provider,
    pub queues: usize,
}
