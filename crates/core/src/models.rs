use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::error::PipelineError;

/// Stable partition key for a document: hex SHA-256 of its source identifier.
pub fn doc_key(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source: String,
    pub doc_key: String,
    pub ordinal: usize,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub doc: String,
    pub doc_key: String,
    pub doc_ordinal: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub meta: ChunkMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retrieved {
    pub text: String,
    pub meta: ChunkMeta,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(flatten)]
    pub meta: ChunkMeta,
    pub text: String,
}

/// What the external index stores per chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: EntryMetadata,
}

impl VectorEntry {
    pub fn from_chunk(chunk: &Chunk, values: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            values,
            metadata: EntryMetadata {
                meta: chunk.meta.clone(),
                text: chunk.text.clone(),
            },
        }
    }
}

/// Structured metrics extracted from a fact sheet. Every scalar is optional:
/// the model is told to emit null for anything absent from the context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundMetrics {
    pub expense_ratio: Option<String>,
    pub aum: Option<String>,
    pub inception_date: Option<String>,
    pub benchmark: Option<String>,
    #[serde(default)]
    pub top_holdings_sample: Vec<String>,
}

/// State threaded through every pipeline stage. One invocation owns exactly
/// one state; stages append to or filter `chunks`/`retrieved`, never reorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub files: Vec<Option<PathBuf>>,
    pub sources: Vec<String>,
    pub question: String,
    pub target_doc: usize,
    pub run_id: String,
    pub documents: Vec<DocumentRecord>,
    pub chunks: Vec<Chunk>,
    pub retrieved: Vec<Retrieved>,
    pub extracted: Option<FundMetrics>,
    pub answer_md: String,
}

impl PipelineState {
    pub fn new(
        files: Vec<Option<PathBuf>>,
        sources: Vec<String>,
        question: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        if sources.is_empty() {
            return Err(PipelineError::InvalidInput(
                "at least one source document is required".to_string(),
            ));
        }
        if files.len() != sources.len() {
            return Err(PipelineError::InvalidInput(format!(
                "{} files but {} sources",
                files.len(),
                sources.len()
            )));
        }

        Ok(Self {
            files,
            sources,
            question: question.into(),
            target_doc: 0,
            run_id: uuid::Uuid::new_v4().to_string(),
            documents: Vec::new(),
            chunks: Vec::new(),
            retrieved: Vec::new(),
            extracted: None,
            answer_md: String::new(),
        })
    }

    /// Single-document state: a local file, a URL to fetch, or both.
    pub fn single(
        file: Option<PathBuf>,
        source: impl Into<String>,
        question: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        Self::new(vec![file], vec![source.into()], question)
    }
}
