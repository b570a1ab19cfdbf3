use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;

use crate::answer::{generate_answer, ANSWER_UNAVAILABLE};
use crate::chunking::{build_chunks, ChunkingConfig};
use crate::completion::CompletionModel;
use crate::embeddings::Embedder;
use crate::error::{PipelineError, ServiceError};
use crate::extractor::extract_text;
use crate::metrics::extract_metrics;
use crate::models::{doc_key, DocumentRecord, FundMetrics, PipelineState, Retrieved, VectorEntry};
use crate::sources::resolve_source;
use crate::traits::VectorIndex;

pub const RETRIEVE_TOP_K: usize = 6;
pub const COMPARE_QUESTION: &str = "Extract key metrics";

const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// A document handed to the comparison flow: an optional local file plus the
/// source identifier used for provenance and partitioning.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub file: Option<PathBuf>,
    pub source: String,
}

impl DocumentInput {
    pub fn new(file: Option<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            file,
            source: source.into(),
        }
    }

    /// http(s) references are fetched at ingest time; anything else is
    /// treated as a local path.
    pub fn from_source(source: &str) -> Self {
        match Url::parse(source) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                Self::new(None, source)
            }
            _ => Self::new(Some(PathBuf::from(source)), source),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRow {
    pub source: String,
    pub metrics: Option<FundMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub rows: Vec<MetricsRow>,
    pub summary_md: String,
}

/// Wires extractor, chunker, embedding/index gateway, and the two model
/// calls into one fixed sequence. Stage-local failures degrade to safe
/// values so every invocation reaches the terminal state; only credential
/// rejections abort.
pub struct Pipeline<E, V, C> {
    embedder: E,
    index: V,
    model: C,
    chunking: ChunkingConfig,
    download_timeout: Duration,
}

impl<E, V, C> Pipeline<E, V, C>
where
    E: Embedder,
    V: VectorIndex,
    C: CompletionModel,
{
    pub fn new(embedder: E, index: V, model: C) -> Self {
        Self {
            embedder,
            index,
            model,
            chunking: ChunkingConfig::default(),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        }
    }

    /// Ingest -> write-index -> retrieve -> extract-metrics -> answer.
    pub async fn run(&self, state: PipelineState) -> Result<PipelineState, PipelineError> {
        info!(
            run_id = %state.run_id,
            documents = state.sources.len(),
            "pipeline run starting"
        );

        let state = self.ingest(state).await?;
        let state = self.write_index(state).await?;
        let state = self.retrieve(state).await?;
        let state = self.extract(state).await?;
        let state = self.answer(state).await?;

        info!(run_id = %state.run_id, "pipeline run complete");
        Ok(state)
    }

    /// Runs the full pipeline once per document with the fixed metrics
    /// question, then renders a diff summary of the two metric sets.
    pub async fn compare(
        &self,
        a: DocumentInput,
        b: DocumentInput,
    ) -> Result<ComparisonReport, PipelineError> {
        let mut rows = Vec::with_capacity(2);
        for input in [a, b] {
            let state =
                PipelineState::single(input.file.clone(), input.source.clone(), COMPARE_QUESTION)?;
            let out = self.run(state).await?;
            rows.push(MetricsRow {
                source: input.source,
                metrics: out.extracted,
            });
        }

        let summary_md = render_comparison(&rows[0], &rows[1]);
        Ok(ComparisonReport { rows, summary_md })
    }

    async fn ingest(&self, mut state: PipelineState) -> Result<PipelineState, PipelineError> {
        let mut documents = Vec::with_capacity(state.sources.len());

        for (ordinal, source) in state.sources.iter().enumerate() {
            let record = DocumentRecord {
                source: source.clone(),
                doc_key: doc_key(source),
                ordinal,
                fetched_at: Utc::now(),
            };

            let file = state.files[ordinal].as_deref();
            let text = match resolve_source(file, source, self.download_timeout).await {
                Ok(path) => extract_text(&path).await,
                Err(ingest_error) => {
                    error!(
                        source = %source,
                        error = %ingest_error,
                        "source resolution failed, continuing with empty text"
                    );
                    String::new()
                }
            };

            documents.push((record, text));
        }

        state.chunks = build_chunks(&documents, self.chunking);
        state.documents = documents.into_iter().map(|(record, _)| record).collect();
        Ok(state)
    }

    async fn write_index(&self, mut state: PipelineState) -> Result<PipelineState, PipelineError> {
        state.chunks.retain(|chunk| !chunk.text.trim().is_empty());
        if state.chunks.is_empty() {
            warn!(run_id = %state.run_id, "no chunks with usable text, skipping indexing");
            return Ok(state);
        }

        if let Err(service_error) = self.embed_and_upsert(&state).await {
            if service_error.is_fatal() {
                return Err(service_error.into());
            }
            warn!(
                run_id = %state.run_id,
                error = %service_error,
                "indexing failed, retrieval will see whatever the index already holds"
            );
        }
        Ok(state)
    }

    async fn embed_and_upsert(&self, state: &PipelineState) -> Result<(), ServiceError> {
        self.index.ensure_index().await?;

        let mut entries = Vec::with_capacity(state.chunks.len());
        for chunk in &state.chunks {
            let values = self.embedder.embed(&chunk.text).await?;
            entries.push(VectorEntry::from_chunk(chunk, values));
        }

        self.index.upsert(&entries).await
    }

    async fn retrieve(&self, mut state: PipelineState) -> Result<PipelineState, PipelineError> {
        let Some(target) = state.documents.get(state.target_doc) else {
            warn!(
                run_id = %state.run_id,
                target = state.target_doc,
                "target document is missing, retrieval skipped"
            );
            state.retrieved = Vec::new();
            return Ok(state);
        };

        let target_key = target.doc_key.clone();
        match self.query_index(&state.question, &target_key).await {
            Ok(hits) => state.retrieved = hits,
            Err(service_error) if service_error.is_fatal() => return Err(service_error.into()),
            Err(service_error) => {
                warn!(
                    run_id = %state.run_id,
                    error = %service_error,
                    "retrieval failed, continuing with empty context"
                );
                state.retrieved = Vec::new();
            }
        }
        Ok(state)
    }

    async fn query_index(
        &self,
        question: &str,
        target_key: &str,
    ) -> Result<Vec<Retrieved>, ServiceError> {
        let vector = self.embedder.embed(question).await?;
        self.index.query(&vector, RETRIEVE_TOP_K, target_key).await
    }

    async fn extract(&self, mut state: PipelineState) -> Result<PipelineState, PipelineError> {
        match extract_metrics(&self.model, &state.retrieved).await {
            Ok(extracted) => state.extracted = extracted,
            Err(service_error) if service_error.is_fatal() => return Err(service_error.into()),
            Err(service_error) => {
                warn!(
                    run_id = %state.run_id,
                    error = %service_error,
                    "metric extraction call failed, leaving metrics incomplete"
                );
                state.extracted = None;
            }
        }
        Ok(state)
    }

    async fn answer(&self, mut state: PipelineState) -> Result<PipelineState, PipelineError> {
        match generate_answer(&self.model, &state.question, &state.retrieved).await {
            Ok(answer_md) => state.answer_md = answer_md,
            Err(service_error) if service_error.is_fatal() => return Err(service_error.into()),
            Err(service_error) => {
                warn!(
                    run_id = %state.run_id,
                    error = %service_error,
                    "answer generation failed, emitting the unavailable note"
                );
                state.answer_md = ANSWER_UNAVAILABLE.to_string();
            }
        }
        Ok(state)
    }
}

pub fn render_comparison(a: &MetricsRow, b: &MetricsRow) -> String {
    let left = a.metrics.clone().unwrap_or_default();
    let right = b.metrics.clone().unwrap_or_default();

    format!(
        "**Compare**\n\
- Source A: {}\n\
- Source B: {}\n\
\n\
**Diff highlights**\n\
- Expense ratio: {} vs {}\n\
- Benchmark: {} vs {}\n\
- Inception: {} vs {}\n",
        a.source,
        b.source,
        field(&left.expense_ratio),
        field(&right.expense_ratio),
        field(&left.benchmark),
        field(&right.benchmark),
        field(&left.inception_date),
        field(&right.inception_date),
    )
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::make_chunk_id;
    use crate::models::{Chunk, ChunkMeta};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const FAKE_DIMENSIONS: usize = 32;

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            FAKE_DIMENSIONS
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            let mut vector = vec![0f32; FAKE_DIMENSIONS];
            for window in text.to_lowercase().as_bytes().windows(3) {
                let mut hash = 1469598103934665603u64;
                for byte in window {
                    hash ^= *byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
                vector[(hash % FAKE_DIMENSIONS as u64) as usize] += 1.0;
            }
            let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if magnitude > 0.0 {
                for value in &mut vector {
                    *value /= magnitude;
                }
            }
            Ok(vector)
        }
    }

    struct FailingEmbedder {
        fatal: bool,
    }

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            FAKE_DIMENSIONS
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
            if self.fatal {
                Err(ServiceError::Auth {
                    backend: "openai".to_string(),
                })
            } else {
                Err(ServiceError::Timeout {
                    backend: "openai".to_string(),
                })
            }
        }
    }

    #[derive(Default)]
    struct InMemoryIndex {
        entries: Mutex<HashMap<String, VectorEntry>>,
        ensure_calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for InMemoryIndex {
        async fn ensure_index(&self) -> Result<(), ServiceError> {
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_index(&self) -> Result<(), ServiceError> {
            self.entries.lock().expect("lock").clear();
            Ok(())
        }

        async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), ServiceError> {
            let mut store = self.entries.lock().expect("lock");
            for entry in entries {
                store.insert(entry.id.clone(), entry.clone());
            }
            Ok(())
        }

        async fn query(
            &self,
            vector: &[f32],
            top_k: usize,
            doc_key: &str,
        ) -> Result<Vec<Retrieved>, ServiceError> {
            let store = self.entries.lock().expect("lock");
            let mut hits: Vec<Retrieved> = store
                .values()
                .filter(|entry| entry.metadata.meta.doc_key == doc_key)
                .map(|entry| Retrieved {
                    text: entry.metadata.text.clone(),
                    meta: entry.metadata.meta.clone(),
                    score: entry
                        .values
                        .iter()
                        .zip(vector.iter())
                        .map(|(a, b)| (a * b) as f64)
                        .sum(),
                })
                .collect();
            hits.sort_by(|left, right| right.score.total_cmp(&left.score));
            hits.truncate(top_k);
            Ok(hits)
        }
    }

    struct StubModel {
        metrics_reply: String,
        answer_reply: String,
    }

    impl StubModel {
        fn new(metrics_reply: &str, answer_reply: &str) -> Self {
            Self {
                metrics_reply: metrics_reply.to_string(),
                answer_reply: answer_reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for StubModel {
        async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
            if prompt.contains("extract a JSON") {
                Ok(self.metrics_reply.clone())
            } else {
                Ok(self.answer_reply.clone())
            }
        }
    }

    fn sheet_chunks(source: &str, ordinal: usize, texts: &[&str]) -> Vec<Chunk> {
        let key = doc_key(source);
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                id: make_chunk_id(&key, index, text),
                text: text.to_string(),
                meta: ChunkMeta {
                    doc: source.to_string(),
                    doc_key: key.clone(),
                    doc_ordinal: ordinal,
                },
            })
            .collect()
    }

    fn indexed_state(source: &str, question: &str, texts: &[&str]) -> PipelineState {
        let mut state = PipelineState::single(None, source, question).expect("state");
        state.documents = vec![DocumentRecord {
            source: source.to_string(),
            doc_key: doc_key(source),
            ordinal: 0,
            fetched_at: Utc::now(),
        }];
        state.chunks = sheet_chunks(source, 0, texts);
        state
    }

    #[tokio::test]
    async fn single_document_qa_answers_with_the_expense_ratio_and_a_citation() {
        let pipeline = Pipeline::new(
            FakeEmbedder,
            InMemoryIndex::default(),
            StubModel::new(
                r#"{"expense_ratio":"0.03%","benchmark":"S&P 500"}"#,
                "The expense ratio is 0.03% [1].",
            ),
        );

        let state = indexed_state(
            "spy.pdf",
            "What is the expense ratio?",
            &["Expense Ratio: 0.03%", "Benchmark: S&P 500"],
        );

        let state = pipeline.write_index(state).await.expect("write");
        let state = pipeline.retrieve(state).await.expect("retrieve");
        let state = pipeline.extract(state).await.expect("extract");
        let state = pipeline.answer(state).await.expect("answer");

        assert!(!state.retrieved.is_empty());
        assert!(state.answer_md.contains("0.03%"));
        assert!(state.answer_md.contains("[1]"));
        let metrics = state.extracted.expect("metrics extracted");
        assert_eq!(metrics.expense_ratio.as_deref(), Some("0.03%"));
    }

    #[tokio::test]
    async fn round_trip_preserves_text_and_metadata() {
        let pipeline = Pipeline::new(
            FakeEmbedder,
            InMemoryIndex::default(),
            StubModel::new("{}", "ok"),
        );

        let state = indexed_state("spy.pdf", "expense ratio", &["Expense Ratio: 0.03%"]);
        let state = pipeline.write_index(state).await.expect("write");
        let state = pipeline.retrieve(state).await.expect("retrieve");

        assert_eq!(state.retrieved.len(), 1);
        assert_eq!(state.retrieved[0].text, "Expense Ratio: 0.03%");
        assert_eq!(state.retrieved[0].meta.doc, "spy.pdf");
        assert_eq!(state.retrieved[0].meta.doc_key, doc_key("spy.pdf"));
    }

    #[tokio::test]
    async fn ensure_index_is_idempotent_across_invocations() {
        let index = InMemoryIndex::default();
        index.ensure_index().await.expect("first ensure");
        index.ensure_index().await.expect("second ensure");
        assert_eq!(index.ensure_calls.load(Ordering::SeqCst), 2);
        assert!(index.entries.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn whitespace_only_extraction_degrades_to_null_metrics_and_a_note() {
        let pipeline = Pipeline::new(
            FakeEmbedder,
            InMemoryIndex::default(),
            StubModel::new("{}", "unused"),
        );

        // Bytes lopdf cannot parse; the subprocess fallback cannot either.
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blank.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%no readable text").expect("write fixture");

        let state = PipelineState::single(
            Some(path),
            "blank.pdf",
            "What is the expense ratio?",
        )
        .expect("state");

        let out = pipeline.run(state).await.expect("run reaches terminal");
        assert!(out.chunks.is_empty());
        assert!(out.retrieved.is_empty());
        assert!(out.extracted.is_none());
        assert_eq!(out.answer_md, crate::answer::NO_CONTEXT_ANSWER);
    }

    #[tokio::test]
    async fn malformed_metrics_reply_still_produces_an_answer() {
        let pipeline = Pipeline::new(
            FakeEmbedder,
            InMemoryIndex::default(),
            StubModel::new(
                "I am definitely not JSON.",
                "The expense ratio is 0.03% [1].",
            ),
        );

        let state = indexed_state(
            "spy.pdf",
            "What is the expense ratio?",
            &["Expense Ratio: 0.03%"],
        );

        let state = pipeline.write_index(state).await.expect("write");
        let state = pipeline.retrieve(state).await.expect("retrieve");
        let state = pipeline.extract(state).await.expect("extract");
        let state = pipeline.answer(state).await.expect("answer");

        assert!(state.extracted.is_none());
        assert!(!state.answer_md.is_empty());
        assert!(state.answer_md.contains("0.03%"));
    }

    #[tokio::test]
    async fn transient_indexing_failure_does_not_abort_the_stage() {
        let pipeline = Pipeline::new(
            FailingEmbedder { fatal: false },
            InMemoryIndex::default(),
            StubModel::new("{}", "ok"),
        );

        let state = indexed_state("spy.pdf", "q", &["Expense Ratio: 0.03%"]);
        let state = pipeline.write_index(state).await.expect("degrades, not aborts");
        assert_eq!(state.chunks.len(), 1);
    }

    #[tokio::test]
    async fn credential_rejection_aborts_the_run() {
        let pipeline = Pipeline::new(
            FailingEmbedder { fatal: true },
            InMemoryIndex::default(),
            StubModel::new("{}", "ok"),
        );

        let state = indexed_state("spy.pdf", "q", &["Expense Ratio: 0.03%"]);
        let result = pipeline.write_index(state).await;
        assert!(matches!(result, Err(PipelineError::Service(_))));
    }

    #[test]
    fn comparison_summary_puts_both_expense_ratios_side_by_side() {
        let a = MetricsRow {
            source: "spy.pdf".to_string(),
            metrics: Some(FundMetrics {
                expense_ratio: Some("0.03%".to_string()),
                benchmark: Some("S&P 500".to_string()),
                inception_date: Some("1993-01-22".to_string()),
                ..Default::default()
            }),
        };
        let b = MetricsRow {
            source: "voo.pdf".to_string(),
            metrics: Some(FundMetrics {
                expense_ratio: Some("0.20%".to_string()),
                benchmark: Some("S&P 500".to_string()),
                inception_date: Some("2010-09-07".to_string()),
                ..Default::default()
            }),
        };

        let summary = render_comparison(&a, &b);
        assert!(summary.contains("0.03% vs 0.20%"));
        assert!(summary.contains("Source A: spy.pdf"));
        assert!(summary.contains("Source B: voo.pdf"));
        assert!(summary.contains("S&P 500 vs S&P 500"));
    }

    #[test]
    fn missing_metrics_render_as_null() {
        let a = MetricsRow {
            source: "a.pdf".to_string(),
            metrics: None,
        };
        let b = MetricsRow {
            source: "b.pdf".to_string(),
            metrics: Some(FundMetrics::default()),
        };

        let summary = render_comparison(&a, &b);
        assert!(summary.contains("Expense ratio: null vs null"));
    }

    #[tokio::test]
    async fn compare_on_unreadable_documents_reaches_terminal_with_null_rows() {
        let pipeline = Pipeline::new(
            FakeEmbedder,
            InMemoryIndex::default(),
            StubModel::new("{}", "unused"),
        );

        let dir = tempfile::tempdir().expect("tempdir");
        let path_a = dir.path().join("a.pdf");
        let path_b = dir.path().join("b.pdf");
        std::fs::write(&path_a, b"%PDF-1.4\n%broken").expect("write fixture");
        std::fs::write(&path_b, b"%PDF-1.4\n%broken").expect("write fixture");

        let report = pipeline
            .compare(
                DocumentInput::new(Some(path_a), "a.pdf"),
                DocumentInput::new(Some(path_b), "b.pdf"),
            )
            .await
            .expect("comparison reaches terminal");

        assert_eq!(report.rows.len(), 2);
        assert!(report.rows.iter().all(|row| row.metrics.is_none()));
        assert!(report.summary_md.contains("null vs null"));
    }

    #[test]
    fn url_sources_are_fetched_and_paths_are_local() {
        let remote = DocumentInput::from_source("https://funds.example/spy.pdf");
        assert!(remote.file.is_none());

        let local = DocumentInput::from_source("data/spy.pdf");
        assert_eq!(local.file.as_deref(), Some(std::path::Path::new("data/spy.pdf")));
    }
}
