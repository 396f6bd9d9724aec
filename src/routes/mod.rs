//! HTTP route handlers for the LLM broker.
//!
//! - `chat`: request dispatch endpoints (/ask, /analyze-image)
//! - `status`: introspection endpoints (/queue/status, /usage, /models, /estimate-tokens)
//! - `admin`: administrative endpoints (/admin/reload-keys)
//! - `health`: liveness and metrics endpoints

pub mod admin;
pub mod chat;
pub mod health;
pub mod status;

pub use admin::reload_keys;
pub use chat::{analyze_image, ask};
pub use health::{health, index, metrics_prometheus};
pub use status::{estimate_tokens, models, queue_status, usage};
