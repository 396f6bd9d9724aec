//! Usage-bucket storage backends.
//!
//! Each queue owns exactly one store. The memory backend keeps counters
//! in-process; the remote backend mirrors them into a record store so a
//! restarted broker resumes with accurate history.

pub mod memory;
pub mod remote;

pub use memory::MemoryUsageStore;
pub use remote::RemoteUsageStore;

use async_trait::async_trait;

use crate::limiter::UsageBucket;

/// Persistent-or-volatile mapping from model key to usage bucket.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Fetch the bucket for a model key, creating a zeroed one on miss.
    async fn get(&self, model_key: &str) -> UsageBucket;

    /// Store a bucket back under its model key.
    async fn set(&self, model_key: &str, bucket: UsageBucket);

    /// All `(model_key, bucket)` pairs, order unspecified.
    async fn entries(&self) -> Vec<(String, UsageBucket)>;

    /// Best-effort persistence. Failures are logged and swallowed; dirty
    /// state stays dirty so a later flush retries.
    async fn persist(&self, now_ms: i64);

    /// Flush outstanding state and release background resources.
    async fn dispose(&self);
}
