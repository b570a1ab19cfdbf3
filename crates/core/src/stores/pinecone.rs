use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::models::{ChunkMeta, Retrieved, VectorEntry};
use crate::traits::VectorIndex;

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const SIMILARITY_METRIC: &str = "cosine";

pub struct PineconeStore {
    client: Client,
    control_url: String,
    api_key: String,
    index_name: String,
    dimension: usize,
    cloud: String,
    region: String,
    host: RwLock<Option<String>>,
}

impl PineconeStore {
    pub fn new(config: &PipelineConfig, dimension: usize) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ServiceError::transport("pinecone", error))?;

        Ok(Self {
            client,
            control_url: CONTROL_PLANE_URL.to_string(),
            api_key: config.pinecone_api_key.clone(),
            index_name: config.index_name.clone(),
            dimension,
            cloud: config.cloud.clone(),
            region: config.region.clone(),
            host: RwLock::new(None),
        })
    }

    /// Points the store at a non-default control plane (self-hosted gateways,
    /// test doubles).
    pub fn with_control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn describe_index(&self) -> Result<Option<Value>, ServiceError> {
        let response = self
            .client
            .get(format!("{}/indexes/{}", self.control_url, self.index_name))
            .header("Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|error| ServiceError::transport("pinecone", error))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Auth {
                backend: "pinecone".to_string(),
            });
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "pinecone".to_string(),
                details: status.to_string(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| ServiceError::transport("pinecone", error))?;
        Ok(Some(body))
    }

    async fn remember_host(&self, described: &Value) {
        if let Some(host) = described.pointer("/host").and_then(Value::as_str) {
            *self.host.write().await = Some(host.to_string());
        }
    }

    async fn host(&self) -> Result<String, ServiceError> {
        if let Some(host) = self.host.read().await.clone() {
            return Ok(host);
        }

        self.ensure_index().await?;
        if let Some(host) = self.host.read().await.clone() {
            return Ok(host);
        }

        // A freshly created index may not report its host in the create
        // response; one more describe resolves it.
        if let Some(described) = self.describe_index().await? {
            self.remember_host(&described).await;
        }
        self.host
            .read()
            .await
            .clone()
            .ok_or_else(|| {
                ServiceError::Request(format!(
                    "index {} has no data-plane host yet",
                    self.index_name
                ))
            })
    }

    fn data_url(&self, host: &str, path: &str) -> String {
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}{path}")
        } else {
            format!("https://{host}{path}")
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeStore {
    async fn ensure_index(&self) -> Result<(), ServiceError> {
        if let Some(described) = self.describe_index().await? {
            info!(index = %self.index_name, "index already exists");
            self.remember_host(&described).await;
            return Ok(());
        }

        info!(index = %self.index_name, "index not found, creating");
        let response = self
            .client
            .post(format!("{}/indexes", self.control_url))
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "name": self.index_name,
                "dimension": self.dimension,
                "metric": SIMILARITY_METRIC,
                "spec": {
                    "serverless": {
                        "cloud": self.cloud,
                        "region": self.region,
                    }
                }
            }))
            .send()
            .await
            .map_err(|error| ServiceError::transport("pinecone", error))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Auth {
                backend: "pinecone".to_string(),
            });
        }
        // Losing a create race to another invocation still means the index
        // exists, which is all this call promises.
        if status == StatusCode::CONFLICT {
            info!(index = %self.index_name, "index created concurrently elsewhere");
            return Ok(());
        }
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "pinecone".to_string(),
                details: status.to_string(),
            });
        }

        if let Ok(body) = response.json::<Value>().await {
            self.remember_host(&body).await;
        }
        Ok(())
    }

    async fn delete_index(&self) -> Result<(), ServiceError> {
        let response = self
            .client
            .delete(format!("{}/indexes/{}", self.control_url, self.index_name))
            .header("Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|error| ServiceError::transport("pinecone", error))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Auth {
                backend: "pinecone".to_string(),
            });
        }
        if status == StatusCode::NOT_FOUND {
            info!(index = %self.index_name, "index does not exist, nothing to delete");
            return Ok(());
        }
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "pinecone".to_string(),
                details: status.to_string(),
            });
        }

        *self.host.write().await = None;
        info!(index = %self.index_name, "index deleted");
        Ok(())
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), ServiceError> {
        if entries.is_empty() {
            warn!(index = %self.index_name, "no vectors to upsert, skipping");
            return Ok(());
        }

        let host = self.host().await?;
        let response = self
            .client
            .post(self.data_url(&host, "/vectors/upsert"))
            .header("Api-Key", &self.api_key)
            .json(&json!({ "vectors": entries }))
            .send()
            .await
            .map_err(|error| ServiceError::transport("pinecone", error))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Auth {
                backend: "pinecone".to_string(),
            });
        }
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "pinecone".to_string(),
                details: status.to_string(),
            });
        }

        info!(index = %self.index_name, count = entries.len(), "upserted vectors");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        doc_key: &str,
    ) -> Result<Vec<Retrieved>, ServiceError> {
        let host = self.host().await?;
        let response = self
            .client
            .post(self.data_url(&host, "/query"))
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": true,
                "filter": { "doc_key": { "$eq": doc_key } },
            }))
            .send()
            .await
            .map_err(|error| ServiceError::transport("pinecone", error))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ServiceError::Auth {
                backend: "pinecone".to_string(),
            });
        }
        if !status.is_success() {
            return Err(ServiceError::BackendResponse {
                backend: "pinecone".to_string(),
                details: status.to_string(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| ServiceError::transport("pinecone", error))?;

        let hits = parse_matches(&payload);
        info!(index = %self.index_name, matches = hits.len(), "similarity query complete");
        Ok(hits)
    }
}

fn parse_matches(payload: &Value) -> Vec<Retrieved> {
    let matches = payload
        .pointer("/matches")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut hits = Vec::new();
    for hit in matches {
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
        let text = hit
            .pointer("/metadata/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let doc = hit
            .pointer("/metadata/doc")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let doc_key = hit
            .pointer("/metadata/doc_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        // Pinecone hands metadata numbers back as floats.
        let doc_ordinal = hit
            .pointer("/metadata/doc_ordinal")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as usize;

        hits.push(Retrieved {
            text,
            meta: ChunkMeta {
                doc,
                doc_key,
                doc_ordinal,
            },
            score,
        });
    }

    hits
}
