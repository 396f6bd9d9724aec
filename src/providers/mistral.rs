//! Mistral API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ChatMessage, Provider, ProviderClient, Role};
use crate::error::BrokerError;

const MISTRAL_API_BASE: &str = "https://api.mistral.ai/v1";

/// Mistral chat-completions client
pub struct MistralClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl MistralClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: MISTRAL_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base = base_url.into();
        self
    }

    async fn complete(&self, model: &str, messages: Vec<Message>) -> Result<String, BrokerError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&ChatCompletionRequest { model, messages })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                return Err(BrokerError::Provider(
                    "mistral authentication failed".to_string(),
                ));
            }
            return Err(BrokerError::Provider(format!(
                "mistral returned {status}: {body}"
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| BrokerError::Provider("mistral returned no choices".to_string()))
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

#[async_trait]
impl ProviderClient for MistralClient {
    fn provider(&self) -> Provider {
        Provider::Mistral
    }

    #[instrument(skip(self, history), fields(model = %model, messages = history.len()))]
    async fn chat(&self, model: &str, history: &[ChatMessage]) -> Result<String, BrokerError> {
        debug!("Sending chat completion to Mistral");
        let messages = history
            .iter()
            .map(|m| Message {
                role: role_name(m.role),
                content: Content::Text(m.content.clone()),
            })
            .collect();
        self.complete(model, messages).await
    }

    #[instrument(skip(self, image_base64, prompt), fields(model = %model))]
    async fn analyze_image(
        &self,
        model: &str,
        image_base64: &str,
        prompt: &str,
    ) -> Result<String, BrokerError> {
        debug!("Sending image analysis to Mistral");
        let messages = vec![Message {
            role: "user",
            content: Content::Parts(vec![
                ContentPart::Text {
                    text: prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/jpeg;base64,{image_base64}"),
                    },
                },
            ]),
        }];
        self.complete(model, messages).await
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Content,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}
