pub mod answer;
pub mod chunking;
pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod sources;
pub mod stores;
pub mod traits;

pub use answer::{
    answer_prompt, generate_answer, ANSWER_CONTEXT_CHUNKS, ANSWER_UNAVAILABLE, NO_CONTEXT_ANSWER,
};
pub use chunking::{build_chunks, make_chunk_id, split_text, ChunkingConfig};
pub use completion::{CompletionModel, OpenAiCompletion};
pub use config::{
    PipelineConfig, DEFAULT_CLOUD, DEFAULT_EMBED_MODEL, DEFAULT_GEN_MODEL, DEFAULT_INDEX_NAME,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_REGION, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use embeddings::{Embedder, OpenAiEmbedder, EMBEDDING_DIMENSIONS};
pub use error::{IngestError, PipelineError, ServiceError};
pub use extractor::{extract_text, join_pages, LopdfExtractor, PageText, PdfExtractor};
pub use metrics::{
    context_text, extract_metrics, metrics_prompt, parse_metrics, METRIC_EXTRACTION_ATTEMPTS,
};
pub use models::{
    doc_key, Chunk, ChunkMeta, DocumentRecord, EntryMetadata, FundMetrics, PipelineState,
    Retrieved, VectorEntry,
};
pub use orchestrator::{
    render_comparison, ComparisonReport, DocumentInput, MetricsRow, Pipeline, COMPARE_QUESTION,
    RETRIEVE_TOP_K,
};
pub use sources::{download_pdf, resolve_source};
pub use stores::PineconeStore;
pub use traits::VectorIndex;
