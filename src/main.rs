//! LLM Broker Binary
//!
//! Standalone binary for the broker server.
//! For library usage, see [`llm_broker`].

use llm_broker::{run_server, BrokerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("llm_broker=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = BrokerConfig::from_env();

    run_server(config).await
}
