//! Google Gemini API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ChatMessage, Provider, ProviderClient, Role};
use crate::error::BrokerError;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini generateContent client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base = base_url.into();
        self
    }

    fn api_url(&self, model: &str) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.api_base, model, self.api_key
        )
    }

    /// System turns become the system instruction; the rest map to
    /// user/model contents.
    fn convert_history(history: &[ChatMessage]) -> (Option<SystemInstruction>, Vec<GeminiContent>) {
        let system_instruction = history
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| SystemInstruction {
                parts: vec![GeminiPart::Text {
                    text: m.content.clone(),
                }],
            });

        let contents = history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| GeminiContent {
                role: match m.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                },
                parts: vec![GeminiPart::Text {
                    text: m.content.clone(),
                }],
            })
            .collect();

        (system_instruction, contents)
    }

    async fn generate(&self, model: &str, request: GeminiRequest) -> Result<String, BrokerError> {
        let response = self
            .client
            .post(self.api_url(model))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(BrokerError::Provider(
                    "gemini authentication failed".to_string(),
                ));
            }
            return Err(BrokerError::Provider(format!(
                "gemini returned {status}: {body}"
            )));
        }

        let body: GeminiResponse = response.json().await?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| match part {
                        GeminiPart::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(BrokerError::Provider(
                "gemini returned no candidates".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    #[instrument(skip(self, history), fields(model = %model, messages = history.len()))]
    async fn chat(&self, model: &str, history: &[ChatMessage]) -> Result<String, BrokerError> {
        debug!("Sending generateContent to Gemini");
        let (system_instruction, contents) = Self::convert_history(history);
        self.generate(
            model,
            GeminiRequest {
                contents,
                system_instruction,
            },
        )
        .await
    }

    #[instrument(skip(self, image_base64, prompt), fields(model = %model))]
    async fn analyze_image(
        &self,
        model: &str,
        image_base64: &str,
        prompt: &str,
    ) -> Result<String, BrokerError> {
        debug!("Sending image analysis to Gemini");
        let contents = vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![
                GeminiPart::Text {
                    text: prompt.to_string(),
                },
                GeminiPart::InlineData {
                    inline_data: InlineData {
                        mime_type: "image/jpeg".to_string(),
                        data: image_base64.to_string(),
                    },
                },
            ],
        }];
        self.generate(
            model,
            GeminiRequest {
                contents,
                system_instruction: None,
            },
        )
        .await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}
