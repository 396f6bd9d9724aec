//! Configuration for the LLM broker.

use std::time::Duration;

/// Which usage-store backend the queues run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UsageStrategy {
    /// Volatile in-process counters
    #[default]
    Memory,
    /// Counters persisted to the remote record store
    Remote,
}

impl UsageStrategy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Where key configurations come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// One key per provider straight from the environment
    #[default]
    Env,
    /// Records in the remote record store's keys collection
    Store,
    /// A JSON array served by an HTTP endpoint
    Http,
}

impl KeyStrategy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "env" => Some(Self::Env),
            "store" => Some(Self::Store),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

/// Connection settings for the remote record store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the record store
    pub url: String,

    /// Admin identity used for authentication
    pub admin_email: String,

    /// Admin password used for authentication
    pub admin_password: String,

    /// Collection holding persisted usage buckets
    pub usage_collection: String,

    /// Collection holding key configurations
    pub keys_collection: String,

    /// How often dirty buckets are flushed
    pub flush_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8090".to_string(),
            admin_email: String::new(),
            admin_password: String::new(),
            usage_collection: "usage".to_string(),
            keys_collection: "api_keys".to_string(),
            flush_interval: Duration::from_secs(15),
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Port to listen on
    pub port: u16,

    /// Usage-store backend selection
    pub usage_strategy: UsageStrategy,

    /// Key resolution strategy
    pub keys_strategy: KeyStrategy,

    /// Endpoint for the `http` key strategy
    pub keys_http_url: Option<String>,

    /// Inter-item delay applied by queues with no structured limits
    pub fallback_delay_ms: Option<u64>,

    /// Mistral API key for the `env` strategy
    pub mistral_api_key: Option<String>,

    /// Gemini API key for the `env` strategy
    pub gemini_api_key: Option<String>,

    /// Remote record store settings
    pub store: StoreConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            usage_strategy: UsageStrategy::default(),
            keys_strategy: KeyStrategy::default(),
            keys_http_url: None,
            fallback_delay_ms: None,
            mistral_api_key: None,
            gemini_api_key: None,
            store: StoreConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BROKER_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }

        if let Ok(val) = std::env::var("USAGE_STRATEGY") {
            if let Some(strategy) = UsageStrategy::parse(&val) {
                config.usage_strategy = strategy;
            }
        }

        if let Ok(val) = std::env::var("KEYS_STRATEGY") {
            if let Some(strategy) = KeyStrategy::parse(&val) {
                config.keys_strategy = strategy;
            }
        }

        config.keys_http_url = std::env::var("KEYS_HTTP_URL").ok();

        if let Ok(val) = std::env::var("BROKER_FALLBACK_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.fallback_delay_ms = Some(ms);
            }
        }

        config.mistral_api_key = std::env::var("MISTRAL_API_KEY").ok();
        config.gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        if let Ok(val) = std::env::var("STORE_URL") {
            config.store.url = val;
        }
        if let Ok(val) = std::env::var("STORE_ADMIN_EMAIL") {
            config.store.admin_email = val;
        }
        if let Ok(val) = std::env::var("STORE_ADMIN_PASSWORD") {
            config.store.admin_password = val;
        }
        if let Ok(val) = std::env::var("STORE_USAGE_COLLECTION") {
            config.store.usage_collection = val;
        }
        if let Ok(val) = std::env::var("STORE_KEYS_COLLECTION") {
            config.store.keys_collection = val;
        }
        if let Ok(val) = std::env::var("STORE_FLUSH_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.store.flush_interval = Duration::from_secs(secs);
            }
        }

        config
    }
}
