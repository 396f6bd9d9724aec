//! Usage store backed by the remote record store.
//!
//! Buckets live in an in-process map just like the memory backend; a
//! background task flushes dirty entries to the record store so that a
//! restarted broker resumes with accurate history. Persistence is strictly
//! best-effort and never blocks dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::UsageStore;
use crate::limiter::{now_ms, UsageBucket};
use crate::store::RecordStoreClient;

struct RemoteInner {
    buckets: HashMap<String, UsageBucket>,
    dirty: HashSet<String>,
    record_ids: HashMap<String, String>,
}

/// Usage store that mirrors buckets into a record-store collection.
pub struct RemoteUsageStore {
    client: Arc<RecordStoreClient>,
    collection: String,
    label: Option<String>,
    inner: Mutex<RemoteInner>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

/// Prefix a model key with the queue label so several queues can share one
/// collection without collisions.
fn namespaced_key(label: Option<&str>, model_key: &str) -> String {
    match label {
        Some(label) if !label.is_empty() => format!("{label}::{model_key}"),
        _ => model_key.to_string(),
    }
}

/// Invert [`namespaced_key`]: `None` when the record belongs to a
/// different queue.
fn strip_namespace<'a>(label: Option<&str>, stored_key: &'a str) -> Option<&'a str> {
    match label {
        Some(label) if !label.is_empty() => {
            let prefix = format!("{label}::");
            stored_key.strip_prefix(&prefix)
        }
        _ => (!stored_key.contains("::")).then_some(stored_key),
    }
}

/// Parse the bucket payload of a stored record, tolerating missing fields
/// and a string-encoded `data` column.
fn parse_bucket(record: &Value, now: i64) -> Option<UsageBucket> {
    let data = record.get("data")?;
    let bucket = match data {
        Value::String(raw) => serde_json::from_str::<UsageBucket>(raw).ok()?,
        Value::Object(_) => serde_json::from_value::<UsageBucket>(data.clone()).ok()?,
        _ => return None,
    };
    Some(bucket.restore(now))
}

impl RemoteUsageStore {
    /// Bootstrap from the record store and start the periodic flush task.
    pub async fn connect(
        client: Arc<RecordStoreClient>,
        collection: impl Into<String>,
        label: Option<String>,
        flush_interval: Duration,
    ) -> Arc<Self> {
        let collection = collection.into();
        let mut buckets = HashMap::new();
        let mut record_ids = HashMap::new();

        match client.list_records(&collection).await {
            Ok(records) => {
                let now = now_ms();
                for record in &records {
                    let Some(stored_key) = record.get("key").and_then(Value::as_str) else {
                        continue;
                    };
                    let Some(model_key) = strip_namespace(label.as_deref(), stored_key) else {
                        continue;
                    };
                    let Some(bucket) = parse_bucket(record, now) else {
                        continue;
                    };
                    if let Some(id) = record.get("id").and_then(Value::as_str) {
                        record_ids.insert(model_key.to_string(), id.to_string());
                    }
                    buckets.insert(model_key.to_string(), bucket);
                }
                info!(
                    collection,
                    label = label.as_deref().unwrap_or(""),
                    restored = buckets.len(),
                    "Restored usage history from record store"
                );
            }
            Err(e) => {
                warn!(error = %e, "Usage bootstrap failed; starting with empty counters");
            }
        }

        let store = Arc::new(Self {
            client,
            collection,
            label,
            inner: Mutex::new(RemoteInner {
                buckets,
                dirty: HashSet::new(),
                record_ids,
            }),
            flush_task: Mutex::new(None),
        });

        let task = {
            let store = Arc::clone(&store);
            let period = flush_interval.max(Duration::from_secs(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The first tick fires immediately; skip it
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    store.persist(now_ms()).await;
                }
            })
        };
        *store.flush_task.lock().await = Some(task);

        store
    }

    async fn flush_one(&self, model_key: &str, bucket: &UsageBucket, known_id: Option<String>) {
        let stored_key = namespaced_key(self.label.as_deref(), model_key);
        let fields = json!({ "key": stored_key, "data": bucket });

        if let Some(id) = known_id.as_deref() {
            match self
                .client
                .update_record(&self.collection, id, &fields)
                .await
            {
                Ok(()) => {
                    self.mark_flushed(model_key, None).await;
                    return;
                }
                Err(e) => {
                    // The record may have been deleted out from under us;
                    // heal by creating a fresh one
                    debug!(model_key, error = %e, "Record update failed, falling back to create");
                }
            }
        }

        match self.client.create_record(&self.collection, &fields).await {
            Ok(new_id) => self.mark_flushed(model_key, Some(new_id)).await,
            Err(e) => warn!(model_key, error = %e, "Usage persist failed; will retry"),
        }
    }

    async fn mark_flushed(&self, model_key: &str, new_id: Option<String>) {
        let mut inner = self.inner.lock().await;
        if let Some(id) = new_id {
            inner.record_ids.insert(model_key.to_string(), id);
        }
        inner.dirty.remove(model_key);
    }
}

#[async_trait]
impl UsageStore for RemoteUsageStore {
    async fn get(&self, model_key: &str) -> UsageBucket {
        let mut inner = self.inner.lock().await;
        inner
            .buckets
            .entry(model_key.to_string())
            .or_insert_with(|| UsageBucket::new(now_ms()))
            .clone()
    }

    async fn set(&self, model_key: &str, bucket: UsageBucket) {
        let mut inner = self.inner.lock().await;
        inner.buckets.insert(model_key.to_string(), bucket);
        inner.dirty.insert(model_key.to_string());
    }

    async fn entries(&self) -> Vec<(String, UsageBucket)> {
        let inner = self.inner.lock().await;
        inner
            .buckets
            .iter()
            .map(|(k, b)| (k.clone(), b.clone()))
            .collect()
    }

    async fn persist(&self, _now_ms: i64) {
        // Snapshot and clear the dirty set up front; a write that lands
        // while we flush re-marks its key and is picked up next round
        let pending: Vec<(String, UsageBucket, Option<String>)> = {
            let mut inner = self.inner.lock().await;
            let keys: Vec<String> = inner.dirty.drain().collect();
            keys.into_iter()
                .filter_map(|key| {
                    let bucket = inner.buckets.get(&key).cloned()?;
                    let id = inner.record_ids.get(&key).cloned();
                    Some((key, bucket, id))
                })
                .collect()
        };

        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "Flushing dirty usage buckets");

        for (key, bucket, id) in &pending {
            self.flush_one(key, bucket, id.clone()).await;
        }
    }

    async fn dispose(&self) {
        self.persist(now_ms()).await;
        if let Some(task) = self.flush_task.lock().await.take() {
            task.abort();
        }
    }
}
