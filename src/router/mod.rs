//! Provider-aware request routing.
//!
//! The router owns every queue. For each request it asks all queues of
//! every candidate provider how long the request would wait, then hands
//! the work to the queue reporting the smallest estimate. Ties break on
//! first-seen order, so routing is deterministic for identical states.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BrokerConfig, KeyStrategy, UsageStrategy};
use crate::error::BrokerError;
use crate::keys;
use crate::limits::KeyConfig;
use crate::providers::{
    ChatMessage, GeminiClient, MistralClient, Provider, ProviderClient,
};
use crate::queuer::{ExecuteFn, RequestQueuer};
use crate::store::RecordStoreClient;
use crate::tokens::{default_estimator, estimate_tokens};
use crate::usage::{MemoryUsageStore, RemoteUsageStore, UsageStore};

/// Provider used when a request names a bare model string.
pub const DEFAULT_PROVIDER: Provider = Provider::Mistral;

/// Default target for image analysis when none is given.
pub const DEFAULT_IMAGE_MODEL: &str = "magistral-small-2509";

/// One `(provider, model)` routing candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub provider: Provider,
    pub model: String,
}

/// The `model` field of a request: a bare name, one target, or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TargetSpec {
    Name(String),
    One(Target),
    Many(Vec<Target>),
}

impl TargetSpec {
    /// Expand into candidates; a bare name is promoted to the default
    /// provider, lists are taken verbatim.
    pub fn candidates(&self) -> Vec<Target> {
        match self {
            TargetSpec::Name(name) => vec![Target {
                provider: DEFAULT_PROVIDER,
                model: name.clone(),
            }],
            TargetSpec::One(target) => vec![target.clone()],
            TargetSpec::Many(targets) => targets.clone(),
        }
    }
}

/// Which providers an administrative reload applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadSelector {
    One(Provider),
    All,
}

impl ReloadSelector {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("all") {
            return Some(Self::All);
        }
        Provider::parse(value).map(Self::One)
    }

    fn providers(&self) -> Vec<Provider> {
        match self {
            Self::One(provider) => vec![*provider],
            Self::All => Provider::ALL.to_vec(),
        }
    }
}

/// A queue paired with the client it dispatches to
#[derive(Clone)]
pub struct ProviderQueue {
    pub queuer: Arc<RequestQueuer>,
    pub client: Arc<dyn ProviderClient>,
}

/// Result of one routed request
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub text: String,
    pub provider: Provider,
    pub model: String,
}

/// Routes requests across all configured queues
pub struct ModelRouter {
    queues: HashMap<Provider, Vec<ProviderQueue>>,
    keys_strategy: KeyStrategy,
}

impl ModelRouter {
    /// Resolve keys for every provider and build the queue sets.
    ///
    /// Fails when the default provider ends up with no queues; the broker
    /// is useless without at least one.
    pub async fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let mut queues = HashMap::new();
        for provider in Provider::ALL {
            let key_configs = match keys::resolve_keys(provider, config).await {
                Ok(configs) => configs,
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Key resolution failed");
                    Vec::new()
                }
            };
            queues.insert(provider, build_queues(provider, key_configs, config).await);
        }

        if queues
            .get(&DEFAULT_PROVIDER)
            .is_none_or(|queues| queues.is_empty())
        {
            return Err(BrokerError::Bootstrap(format!(
                "no keys resolved for default provider {DEFAULT_PROVIDER}"
            )));
        }

        for (provider, provider_queues) in &queues {
            info!(
                provider = %provider,
                queues = provider_queues.len(),
                "Provider queues ready"
            );
        }

        Ok(Self {
            queues,
            keys_strategy: config.keys_strategy,
        })
    }

    /// Assemble a router from pre-built queues.
    pub fn from_parts(
        queues: HashMap<Provider, Vec<ProviderQueue>>,
        keys_strategy: KeyStrategy,
    ) -> Self {
        Self { queues, keys_strategy }
    }

    pub fn queues(&self) -> &HashMap<Provider, Vec<ProviderQueue>> {
        &self.queues
    }

    /// The queue with the smallest estimated wait across all candidates.
    async fn pick(
        &self,
        candidates: &[Target],
        tokens: u64,
    ) -> Result<(&ProviderQueue, Target), BrokerError> {
        let mut best: Option<(&ProviderQueue, Target, u64)> = None;

        for target in candidates {
            let Some(queues) = self.queues.get(&target.provider) else {
                continue;
            };
            for queue in queues {
                let wait = queue
                    .queuer
                    .estimate_wait_ms(Some(&target.model), tokens)
                    .await;
                debug!(
                    provider = %target.provider,
                    model = %target.model,
                    queue = queue.queuer.label(),
                    wait_ms = wait,
                    "Candidate wait estimate"
                );
                if best.as_ref().is_none_or(|(_, _, current)| wait < *current) {
                    best = Some((queue, target.clone(), wait));
                }
            }
        }

        match best {
            Some((queue, target, wait)) => {
                info!(
                    provider = %target.provider,
                    model = %target.model,
                    queue = queue.queuer.label(),
                    wait_ms = wait,
                    "Routed request"
                );
                Ok((queue, target))
            }
            None => Err(BrokerError::NoAvailableProvider),
        }
    }

    /// Route a chat request and wait for its completion.
    pub async fn dispatch_chat(
        &self,
        history: &[ChatMessage],
        target: &TargetSpec,
    ) -> Result<RoutedResponse, BrokerError> {
        let candidates = target.candidates();
        let estimate_text = history
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let tokens = estimate_tokens(&estimate_text);

        let (queue, chosen) = self.pick(&candidates, tokens).await?;

        let client = Arc::clone(&queue.client);
        let model = chosen.model.clone();
        let owned_history = history.to_vec();
        let execute: ExecuteFn =
            Box::new(move || Box::pin(async move { client.chat(&model, &owned_history).await }));

        let text = queue
            .queuer
            .add(execute, Some(&estimate_text), Some(&chosen.model))
            .await?;

        Ok(RoutedResponse {
            text,
            provider: chosen.provider,
            model: chosen.model,
        })
    }

    /// Route an image-analysis request and wait for its completion.
    pub async fn dispatch_image(
        &self,
        image_base64: String,
        prompt: String,
        target: &TargetSpec,
    ) -> Result<RoutedResponse, BrokerError> {
        let candidates = target.candidates();
        let tokens = estimate_tokens(&prompt);

        let (queue, chosen) = self.pick(&candidates, tokens).await?;

        let client = Arc::clone(&queue.client);
        let model = chosen.model.clone();
        let owned_prompt = prompt.clone();
        let execute: ExecuteFn = Box::new(move || {
            Box::pin(async move {
                client
                    .analyze_image(&model, &image_base64, &owned_prompt)
                    .await
            })
        });

        let text = queue
            .queuer
            .add(execute, Some(&prompt), Some(&chosen.model))
            .await?;

        Ok(RoutedResponse {
            text,
            provider: chosen.provider,
            model: chosen.model,
        })
    }

    /// Sorted, deduplicated model names per provider, harvested from the
    /// explicit per-model limit tables.
    pub fn models(&self) -> HashMap<Provider, Vec<String>> {
        self.queues
            .iter()
            .map(|(provider, queues)| {
                let mut names: Vec<String> = queues
                    .iter()
                    .flat_map(|q| q.queuer.config().limited_models())
                    .map(str::to_string)
                    .collect();
                names.sort();
                names.dedup();
                (*provider, names)
            })
            .collect()
    }

    /// Re-resolve keys for the selected providers and build the successor
    /// router. Untouched providers keep their queues; replaced queues are
    /// disposed, though in-flight dispatches holding them run to
    /// completion against their old clients.
    pub async fn reload(
        &self,
        selector: ReloadSelector,
        config: &BrokerConfig,
    ) -> Result<(Self, Vec<(Provider, usize)>), BrokerError> {
        if self.keys_strategy == KeyStrategy::Env {
            return Err(BrokerError::InvalidRequest(
                "key reload is unavailable when keys come from the environment".to_string(),
            ));
        }

        let selected = selector.providers();
        let mut queues: HashMap<Provider, Vec<ProviderQueue>> = self
            .queues
            .iter()
            .filter(|(provider, _)| !selected.contains(*provider))
            .map(|(provider, existing)| (*provider, existing.clone()))
            .collect();

        let mut summary = Vec::new();
        for provider in selected {
            let key_configs = keys::resolve_keys(provider, config).await?;
            let fresh = build_queues(provider, key_configs, config).await;
            info!(provider = %provider, queues = fresh.len(), "Reloaded provider keys");
            summary.push((provider, fresh.len()));
            queues.insert(provider, fresh);

            if let Some(old) = self.queues.get(&provider) {
                for queue in old {
                    queue.queuer.dispose().await;
                }
            }
        }

        Ok((
            Self {
                queues,
                keys_strategy: self.keys_strategy,
            },
            summary,
        ))
    }
}

fn build_client(provider: Provider, key: &str) -> Arc<dyn ProviderClient> {
    match provider {
        Provider::Mistral => Arc::new(MistralClient::new(key)),
        Provider::Gemini => Arc::new(GeminiClient::new(key)),
    }
}

async fn build_queues(
    provider: Provider,
    key_configs: Vec<KeyConfig>,
    config: &BrokerConfig,
) -> Vec<ProviderQueue> {
    let mut queues = Vec::with_capacity(key_configs.len());
    let store_client = match config.usage_strategy {
        UsageStrategy::Remote => Some(Arc::new(RecordStoreClient::new(&config.store))),
        UsageStrategy::Memory => None,
    };

    for key_config in key_configs {
        let usage: Arc<dyn UsageStore> = match &store_client {
            Some(client) => {
                RemoteUsageStore::connect(
                    Arc::clone(client),
                    config.store.usage_collection.clone(),
                    Some(key_config.label.clone()),
                    config.store.flush_interval,
                )
                .await
            }
            None => Arc::new(MemoryUsageStore::new()),
        };
        let client = build_client(provider, &key_config.key);
        let queuer = RequestQueuer::new(key_config, usage, Some(default_estimator()));
        queues.push(ProviderQueue { queuer, client });
    }
    queues
}
