use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::ServiceError;

#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

pub struct OpenAiCompletion {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletion {
    pub fn new(config: &PipelineConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ServiceError::transport("openai", error))?;

        Ok(Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.gen_model.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl CompletionModel for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: prompt,
                }],
            })
            .send()
            .await
            .map_err(|error| ServiceError::transport("openai", error))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Auth {
                backend: "openai".to_string(),
            });
        }
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "openai".to_string(),
                details: status.to_string(),
            });
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|error| ServiceError::transport("openai", error))?;

        let first = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::BackendResponse {
                backend: "openai".to_string(),
                details: "completion response had no choices".to_string(),
            })?;

        Ok(first.message.content)
    }
}
