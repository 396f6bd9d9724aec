//! Upstream LLM provider clients.
//!
//! Each queue owns exactly one client; the single-dispatcher invariant
//! means a client only ever sees one call at a time.

pub mod gemini;
pub mod mistral;

pub use gemini::GeminiClient;
pub use mistral::MistralClient;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Supported upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mistral,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Mistral, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Mistral => "mistral",
            Provider::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "mistral" => Some(Provider::Mistral),
            "gemini" => Some(Provider::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message roles accepted by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn of conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Client for one upstream LLM API
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this client talks to
    fn provider(&self) -> Provider;

    /// Run a chat completion and return the assistant text.
    async fn chat(&self, model: &str, history: &[ChatMessage]) -> Result<String, BrokerError>;

    /// Analyze a base64-encoded image and return the description text.
    async fn analyze_image(
        &self,
        model: &str,
        image_base64: &str,
        prompt: &str,
    ) -> Result<String, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!(Provider::parse("mistral"), Some(Provider::Mistral));
        assert_eq!(Provider::parse("Gemini"), Some(Provider::Gemini));
        assert_eq!(Provider::parse("openai"), None);
    }

    #[test]
    fn test_role_wire_format() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role": "user", "content": "hi"}"#).expect("parses");
        assert_eq!(message.role, Role::User);

        // Unknown roles are rejected at the edge
        let bad = serde_json::from_str::<ChatMessage>(r#"{"role": "robot", "content": "hi"}"#);
        assert!(bad.is_err());
    }
}
