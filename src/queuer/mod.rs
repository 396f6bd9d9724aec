//! Per-key request queue with rate-limit-aware dispatch.
//!
//! One queuer exists per API key. Items wait in a FIFO; a single
//! cooperative dispatch task scans for the earliest *runnable* item, not
//! necessarily the head, so a throttled model never holds up a free one.
//! Ordering within a single model is preserved because the first runnable
//! item for that model is always the oldest.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::limiter::{now_ms, record, snapshot, wait_ms, BucketSnapshot, UsageBucket};
use crate::limits::{KeyConfig, DEFAULT_MODEL_KEY};
use crate::metrics::QUEUE_DEPTH;
use crate::tokens::TokenEstimator;
use crate::usage::UsageStore;

/// Smoothing factor for the execution-latency moving average.
const EWMA_ALPHA: f64 = 0.25;

/// Seed for the latency estimate before the first sample.
const INITIAL_EXEC_MS: f64 = 500.0;

/// Bounds on the idle sleep between runnable scans.
const MIN_IDLE_SLEEP_MS: u64 = 1;
const MAX_IDLE_SLEEP_MS: u64 = 5_000;

/// Bail-out for wait simulations whose limits can never clear.
const MAX_SIM_STEPS: usize = 10_000;

/// Outcome of one queued execution.
pub type ExecuteResult = Result<String, BrokerError>;

/// The caller-provided work closure.
pub type ExecuteFn = Box<dyn FnOnce() -> BoxFuture<'static, ExecuteResult> + Send>;

fn model_key(model: Option<&str>) -> String {
    model.unwrap_or(DEFAULT_MODEL_KEY).to_string()
}

struct QueueItem {
    id: Uuid,
    execute: ExecuteFn,
    tokens: u64,
    model: Option<String>,
    done: oneshot::Sender<ExecuteResult>,
}

struct QueuerInner {
    queue: VecDeque<QueueItem>,
    is_processing: bool,
    estimated_exec_ms: f64,
}

enum Selection {
    /// Queue drained; the dispatch task exits
    Empty,
    /// Nothing runnable; sleep this long and rescan
    Sleep(u64),
    /// Run this item now
    Run(QueueItem),
}

/// Single-key scheduler owning a FIFO, a usage store and the dispatch task.
pub struct RequestQueuer {
    config: KeyConfig,
    usage: Arc<dyn UsageStore>,
    estimator: Option<TokenEstimator>,
    inner: Mutex<QueuerInner>,
}

impl RequestQueuer {
    pub fn new(
        config: KeyConfig,
        usage: Arc<dyn UsageStore>,
        estimator: Option<TokenEstimator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            usage,
            estimator,
            inner: Mutex::new(QueuerInner {
                queue: VecDeque::new(),
                is_processing: false,
                estimated_exec_ms: INITIAL_EXEC_MS,
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn config(&self) -> &KeyConfig {
        &self.config
    }

    pub async fn queue_length(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_processing(&self) -> bool {
        self.inner.lock().await.is_processing
    }

    /// Smoothed per-item execution latency in milliseconds.
    pub async fn estimated_exec_ms(&self) -> u64 {
        self.inner.lock().await.estimated_exec_ms.round() as u64
    }

    /// Submit work. Resolves when the item has executed (or immediately on
    /// the fast path) with the closure's own result.
    ///
    /// Fast path: a model with no active limits on a queue with no
    /// fallback delay executes inline: the queuer is transparent and the
    /// usage store is never touched.
    pub async fn add(
        self: &Arc<Self>,
        execute: ExecuteFn,
        token_estimate_text: Option<&str>,
        model: Option<&str>,
    ) -> ExecuteResult {
        let tokens = match (token_estimate_text, &self.estimator) {
            (Some(text), Some(estimator)) => estimator(text),
            _ => 0,
        };

        if self.config.active_limits(model).is_empty() && self.config.fallback_delay_ms.is_none() {
            return execute().await;
        }

        let (done, result) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            inner.queue.push_back(QueueItem {
                id: Uuid::new_v4(),
                execute,
                tokens,
                model: model.map(str::to_string),
                done,
            });
            QUEUE_DEPTH
                .with_label_values(&[self.label()])
                .set(inner.queue.len() as f64);
            debug!(
                queue = %self.label(),
                model = model.unwrap_or(DEFAULT_MODEL_KEY),
                tokens,
                depth = inner.queue.len(),
                "Request enqueued"
            );
            if !inner.is_processing {
                inner.is_processing = true;
                tokio::spawn(Arc::clone(self).dispatch_loop());
            }
        }

        match result.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BrokerError::Internal(
                "queue dropped the request before completion".to_string(),
            )),
        }
    }

    /// Scan the FIFO for the earliest runnable item under the current
    /// bucket state, or report how long to sleep before rescanning.
    async fn select_runnable(&self) -> Selection {
        let mut inner = self.inner.lock().await;
        if inner.queue.is_empty() {
            inner.is_processing = false;
            return Selection::Empty;
        }

        let now = now_ms();
        let mut min_wait = u64::MAX;

        for idx in 0..inner.queue.len() {
            let (model, tokens) = {
                let item = &inner.queue[idx];
                (item.model.clone(), item.tokens)
            };
            let limits = self.config.active_limits(model.as_deref());
            let key = model_key(model.as_deref());

            let before = self.usage.get(&key).await;
            let mut bucket = before.clone();
            let wait = wait_ms(now, &limits, &mut bucket, tokens);
            if bucket != before {
                // Maintenance shrank the live bucket; keep the store honest
                self.usage.set(&key, bucket).await;
            }

            if wait == 0 {
                if let Some(item) = inner.queue.remove(idx) {
                    QUEUE_DEPTH
                        .with_label_values(&[self.label()])
                        .set(inner.queue.len() as f64);
                    return Selection::Run(item);
                }
            }
            min_wait = min_wait.min(wait);
        }

        Selection::Sleep(min_wait.clamp(MIN_IDLE_SLEEP_MS, MAX_IDLE_SLEEP_MS))
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            let item = match self.select_runnable().await {
                Selection::Empty => return,
                Selection::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    continue;
                }
                Selection::Run(item) => item,
            };

            let started = Instant::now();
            let outcome = (item.execute)().await;
            let elapsed_ms = started.elapsed().as_millis() as f64;

            {
                let mut inner = self.inner.lock().await;
                inner.estimated_exec_ms += EWMA_ALPHA * (elapsed_ms - inner.estimated_exec_ms);
            }

            match &outcome {
                Ok(_) => {
                    // Only successful calls consume budget
                    let completed = now_ms();
                    let key = model_key(item.model.as_deref());
                    let mut bucket = self.usage.get(&key).await;
                    record(completed, item.tokens, &mut bucket);
                    self.usage.set(&key, bucket).await;

                    let usage = Arc::clone(&self.usage);
                    tokio::spawn(async move {
                        usage.persist(completed).await;
                    });
                }
                Err(e) => {
                    warn!(queue = %self.label(), item = %item.id, error = %e, "Dispatched item failed");
                }
            }

            if item.done.send(outcome).is_err() {
                debug!(queue = %self.label(), item = %item.id, "Caller gave up before completion");
            }

            if let Some(delay) = self.config.fallback_delay_ms {
                let queue_busy = !self.inner.lock().await.queue.is_empty();
                if queue_busy {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// Best-effort wait estimate for a hypothetical request joining the
    /// tail of this queue right now.
    ///
    /// Replays the whole pending queue plus the hypothetical item against
    /// a deep copy of every bucket, using the smoothed execution latency
    /// as each item's duration. The live store is never mutated.
    pub async fn estimate_wait_ms(&self, model: Option<&str>, tokens_needed: u64) -> u64 {
        let (mut pending, exec_ms) = {
            let inner = self.inner.lock().await;
            let pending: Vec<(Option<String>, u64)> = inner
                .queue
                .iter()
                .map(|item| (item.model.clone(), item.tokens))
                .collect();
            (pending, inner.estimated_exec_ms.max(1.0).round() as i64)
        };
        pending.push((model.map(str::to_string), tokens_needed));
        let hypothetical = pending.len() - 1;

        let mut sandbox: HashMap<String, UsageBucket> =
            self.usage.entries().await.into_iter().collect();

        let start = now_ms();
        let mut sim_now = start;
        let mut remaining: VecDeque<(usize, Option<String>, u64)> = pending
            .into_iter()
            .enumerate()
            .map(|(idx, (model, tokens))| (idx, model, tokens))
            .collect();

        for _ in 0..MAX_SIM_STEPS {
            let mut min_wait = u64::MAX;
            let mut runnable: Option<usize> = None;

            for (pos, (_, model, tokens)) in remaining.iter().enumerate() {
                let limits = self.config.active_limits(model.as_deref());
                let key = model_key(model.as_deref());
                let bucket = sandbox
                    .entry(key)
                    .or_insert_with(|| UsageBucket::new(sim_now));
                let wait = wait_ms(sim_now, &limits, bucket, *tokens);
                if wait == 0 {
                    runnable = Some(pos);
                    break;
                }
                min_wait = min_wait.min(wait);
            }

            match runnable {
                Some(pos) => {
                    let (idx, model, tokens) = match remaining.remove(pos) {
                        Some(entry) => entry,
                        None => break,
                    };
                    if idx == hypothetical {
                        return (sim_now - start).max(0) as u64;
                    }
                    let completed = sim_now + exec_ms;
                    let bucket = sandbox
                        .entry(model_key(model.as_deref()))
                        .or_insert_with(|| UsageBucket::new(completed));
                    record(completed, tokens, bucket);
                    sim_now = completed;
                    if let Some(delay) = self.config.fallback_delay_ms {
                        if !remaining.is_empty() {
                            sim_now += delay as i64;
                        }
                    }
                }
                None => {
                    sim_now += min_wait.clamp(MIN_IDLE_SLEEP_MS, MAX_IDLE_SLEEP_MS) as i64;
                }
            }
        }

        (sim_now - start).max(0) as u64
    }

    /// Fresh per-model usage view with maintenance applied.
    pub async fn usage_snapshot(&self) -> BTreeMap<String, BucketSnapshot> {
        let now = now_ms();
        self.usage
            .entries()
            .await
            .into_iter()
            .map(|(key, bucket)| (key, snapshot(now, &bucket)))
            .collect()
    }

    /// Flush the usage store and release its background resources.
    pub async fn dispose(&self) {
        self.usage.dispose().await;
    }
}
