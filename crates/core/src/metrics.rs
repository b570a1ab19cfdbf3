use regex::Regex;
use tracing::{error, info, warn};

use crate::completion::CompletionModel;
use crate::error::ServiceError;
use crate::models::{FundMetrics, Retrieved};

/// One initial request plus one clarification round.
pub const METRIC_EXTRACTION_ATTEMPTS: usize = 2;

const RETRY_CLARIFICATION: &str = "Your previous reply was not valid JSON. \
Respond with a single JSON object only, no prose and no code fences.";

/// Retrieved chunk texts joined in rank order.
pub fn context_text(retrieved: &[Retrieved]) -> String {
    retrieved
        .iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn metrics_prompt(context: &str) -> String {
    format!(
        r#"From the following ETF fact-sheet snippets, extract a JSON with:
{{
 "expense_ratio": "e.g., 0.03%",
 "aum": "e.g., $450B" or null,
 "inception_date": "YYYY-MM-DD or original format",
 "benchmark": "index name",
 "top_holdings_sample": ["...","..."] (up to 5 if visible)
}}
Only use values present in the context. If unknown, use null.
Context:
{context}"#
    )
}

/// Recovers a schema-valid metrics object from model text: the raw reply,
/// then a fenced ```json block, then the outermost brace span.
pub fn parse_metrics(raw: &str) -> Option<FundMetrics> {
    let trimmed = raw.trim();
    if let Ok(metrics) = serde_json::from_str(trimmed) {
        return Some(metrics);
    }

    if let Ok(fence) = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```") {
        if let Some(body) = fence.captures(trimmed).and_then(|c| c.get(1)) {
            if let Ok(metrics) = serde_json::from_str(body.as_str()) {
                return Some(metrics);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Asks the model for structured metrics over the retrieved context, with one
/// clarification retry on a non-JSON reply. `None` is the explicit
/// incomplete outcome; service failures propagate to the caller's policy.
pub async fn extract_metrics<C>(
    model: &C,
    retrieved: &[Retrieved],
) -> Result<Option<FundMetrics>, ServiceError>
where
    C: CompletionModel + ?Sized,
{
    if retrieved.is_empty() {
        info!("no retrieved context; skipping metric extraction");
        return Ok(None);
    }

    let context = context_text(retrieved);
    let base_prompt = metrics_prompt(&context);
    let mut prompt = base_prompt.clone();
    let mut last_raw = String::new();

    for attempt in 1..=METRIC_EXTRACTION_ATTEMPTS {
        let raw = model.complete(&prompt).await?;
        if let Some(extracted) = parse_metrics(&raw) {
            info!(attempt, "metric extraction complete");
            return Ok(Some(extracted));
        }
        warn!(attempt, "metric extraction reply was not schema-valid JSON");
        last_raw = raw;
        prompt = format!("{base_prompt}\n\n{RETRY_CLARIFICATION}");
    }

    error!(raw = %last_raw, "metric extraction incomplete after retries");
    Ok(None)
}
