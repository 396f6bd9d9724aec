//! In-memory usage store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::UsageStore;
use crate::limiter::{now_ms, UsageBucket};

/// Volatile usage store; everything lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    buckets: Mutex<HashMap<String, UsageBucket>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn get(&self, model_key: &str) -> UsageBucket {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(model_key.to_string())
            .or_insert_with(|| UsageBucket::new(now_ms()))
            .clone()
    }

    async fn set(&self, model_key: &str, bucket: UsageBucket) {
        let mut buckets = self.buckets.lock().await;
        buckets.insert(model_key.to_string(), bucket);
    }

    async fn entries(&self) -> Vec<(String, UsageBucket)> {
        let buckets = self.buckets.lock().await;
        buckets.iter().map(|(k, b)| (k.clone(), b.clone())).collect()
    }

    async fn persist(&self, _now_ms: i64) {}

    async fn dispose(&self) {}
}
