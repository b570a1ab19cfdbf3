use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_GEN_MODEL: &str = "gpt-5-nano";
pub const DEFAULT_INDEX_NAME: &str = "finflow";
pub const DEFAULT_CLOUD: &str = "aws";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Resolved configuration handed to the core by the caller. The core never
/// reads the environment; the CLI maps env vars and flags into this struct.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub embed_model: String,
    pub gen_model: String,
    pub pinecone_api_key: String,
    pub index_name: String,
    pub cloud: String,
    pub region: String,
    pub request_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(openai_api_key: impl Into<String>, pinecone_api_key: impl Into<String>) -> Self {
        Self {
            openai_api_key: openai_api_key.into(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            pinecone_api_key: pinecone_api_key.into(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            cloud: DEFAULT_CLOUD.to_string(),
            region: DEFAULT_REGION.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_served_models() {
        let config = PipelineConfig::new("sk-test", "pc-test");
        assert_eq!(config.embed_model, "text-embedding-3-small");
        assert_eq!(config.index_name, "finflow");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
