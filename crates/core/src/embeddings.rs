use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::ServiceError;

/// Output width of the default embedding model (text-embedding-3-small).
pub const EMBEDDING_DIMENSIONS: usize = 1536;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &PipelineConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ServiceError::transport("openai", error))?;

        Ok(Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.embed_model.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
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

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| ServiceError::transport("openai", error))?;

        let first = payload
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::BackendResponse {
                backend: "openai".to_string(),
                details: "embedding response had no data".to_string(),
            })?;

        Ok(first.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_model_and_input() {
        let body = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: "Expense Ratio: 0.03%",
        })
        .expect("request should serialize");

        assert_eq!(body["model"], "text-embedding-3-small");
        assert_eq!(body["input"], "Expense Ratio: 0.03%");
    }

    #[test]
    fn response_parses_the_first_embedding() {
        let raw = r#"{"data":[{"embedding":[0.25,-0.5,1.0]}],"model":"text-embedding-3-small"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).expect("response should parse");
        assert_eq!(parsed.data[0].embedding, vec![0.25, -0.5, 1.0]);
    }
}
