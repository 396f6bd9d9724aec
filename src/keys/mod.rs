//! Key-configuration resolvers.
//!
//! Three strategies produce the `KeyConfig` list for a provider: one key
//! straight from the environment, records in the remote store's keys
//! collection, or a JSON array served by an HTTP endpoint. Results are
//! deduplicated by raw key string.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{BrokerConfig, KeyStrategy};
use crate::error::BrokerError;
use crate::limits::{parse_limit_table, KeyConfig};
use crate::providers::Provider;
use crate::store::RecordStoreClient;

/// Inter-item delay handed to env-resolved keys, which carry no limits.
pub const DEFAULT_FALLBACK_DELAY_MS: u64 = 1_000;

/// Resolve the key configurations for one provider.
pub async fn resolve_keys(
    provider: Provider,
    config: &BrokerConfig,
) -> Result<Vec<KeyConfig>, BrokerError> {
    let configs = match config.keys_strategy {
        KeyStrategy::Env => env_keys(provider, config),
        KeyStrategy::Store => store_keys(provider, config).await?,
        KeyStrategy::Http => http_keys(provider, config).await?,
    };
    let configs = dedup_by_key(configs);
    debug!(provider = %provider, count = configs.len(), "Resolved key configurations");
    Ok(configs)
}

fn env_keys(provider: Provider, config: &BrokerConfig) -> Vec<KeyConfig> {
    let key = match provider {
        Provider::Mistral => config.mistral_api_key.clone(),
        Provider::Gemini => config.gemini_api_key.clone(),
    };

    let Some(key) = key.filter(|k| !k.is_empty()) else {
        return Vec::new();
    };

    vec![KeyConfig {
        key,
        label: format!("{provider}-env"),
        default_limits: Vec::new(),
        model_limits: Default::default(),
        fallback_delay_ms: Some(
            config.fallback_delay_ms.unwrap_or(DEFAULT_FALLBACK_DELAY_MS),
        ),
    }]
}

async fn store_keys(
    provider: Provider,
    config: &BrokerConfig,
) -> Result<Vec<KeyConfig>, BrokerError> {
    let client = RecordStoreClient::new(&config.store);
    let records = client.list_records(&config.store.keys_collection).await?;

    Ok(records
        .iter()
        .filter(|record| entry_provider(record) == Some(provider))
        .enumerate()
        .filter_map(|(index, record)| parse_entry(record, provider, index))
        .collect())
}

async fn http_keys(
    provider: Provider,
    config: &BrokerConfig,
) -> Result<Vec<KeyConfig>, BrokerError> {
    let url = config.keys_http_url.as_deref().ok_or_else(|| {
        BrokerError::Bootstrap("KEYS_STRATEGY=http requires KEYS_HTTP_URL".to_string())
    })?;

    let response = reqwest::Client::new()
        .get(url)
        .query(&[("provider", provider.as_str())])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(BrokerError::Bootstrap(format!(
            "key endpoint returned {status}"
        )));
    }

    let entries: Vec<Value> = response.json().await?;
    Ok(entries
        .iter()
        // The endpoint may pre-filter; only reject entries that name a
        // different provider
        .filter(|entry| entry_provider(entry).map_or(true, |p| p == provider))
        .enumerate()
        .filter_map(|(index, entry)| parse_entry(entry, provider, index))
        .collect())
}

/// Which provider a stored entry belongs to, from its `provider` or `type`
/// field.
fn entry_provider(entry: &Value) -> Option<Provider> {
    entry
        .get("provider")
        .or_else(|| entry.get("type"))
        .and_then(Value::as_str)
        .and_then(Provider::parse)
}

fn parse_entry(entry: &Value, provider: Provider, index: usize) -> Option<KeyConfig> {
    let key = entry.get("key").and_then(Value::as_str)?.to_string();
    if key.is_empty() {
        warn!(provider = %provider, index, "Skipping key entry with empty key");
        return None;
    }

    let label = entry
        .get("label")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-{}", provider, index + 1));

    let (default_limits, model_limits) = entry
        .get("limit")
        .map(parse_limit_table)
        .unwrap_or_default();

    let fallback_delay_ms = entry
        .get("fallbackDelayMs")
        .or_else(|| entry.get("fallback_delay_ms"))
        .and_then(Value::as_u64);

    Some(KeyConfig {
        key,
        label,
        default_limits,
        model_limits,
        fallback_delay_ms,
    })
}

fn dedup_by_key(configs: Vec<KeyConfig>) -> Vec<KeyConfig> {
    let mut seen = HashSet::new();
    configs
        .into_iter()
        .filter(|config| seen.insert(config.key.clone()))
        .collect()
}
