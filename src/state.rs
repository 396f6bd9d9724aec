//! Application state for the LLM broker.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::BrokerConfig;
use crate::router::ModelRouter;

/// Application state shared across all handlers
pub struct AppState {
    /// The current routing engine. Handlers snapshot the `Arc` and drop
    /// the lock before dispatching, so a key reload never waits on
    /// in-flight provider calls; it just swaps in the successor router.
    pub router: RwLock<Arc<ModelRouter>>,

    /// Configuration, kept for reload
    pub config: BrokerConfig,
}

impl AppState {
    /// Create new application state
    pub fn new(router: ModelRouter, config: BrokerConfig) -> Self {
        Self {
            router: RwLock::new(Arc::new(router)),
            config,
        }
    }

    /// Snapshot the current router without holding the lock.
    pub async fn current_router(&self) -> Arc<ModelRouter> {
        Arc::clone(&*self.router.read().await)
    }
}
