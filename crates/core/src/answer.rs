use tracing::info;

use crate::completion::CompletionModel;
use crate::error::ServiceError;
use crate::models::Retrieved;

/// How many retrieved chunks, by rank, are shown to the answer model.
pub const ANSWER_CONTEXT_CHUNKS: usize = 5;

pub const NO_CONTEXT_ANSWER: &str =
    "_No indexed content matched this question; the document may be empty or unreadable._";

pub const ANSWER_UNAVAILABLE: &str =
    "_The answer could not be generated for this run; the completion service was unavailable._";

pub fn answer_prompt(question: &str, retrieved: &[Retrieved]) -> String {
    let context = retrieved
        .iter()
        .take(ANSWER_CONTEXT_CHUNKS)
        .enumerate()
        .map(|(index, hit)| format!("[{}] {}", index + 1, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the user's question about the ETF using the context.\n\
Cite clause numbers 1..N by order (e.g., [1], [2]).\n\
Context:\n{context}\n\nQuestion: {question}\nShort markdown answer:"
    )
}

/// Produces the cited markdown answer. The model's text is returned as-is;
/// an empty retrieval context yields a fixed note without a model call.
pub async fn generate_answer<C>(
    model: &C,
    question: &str,
    retrieved: &[Retrieved],
) -> Result<String, ServiceError>
where
    C: CompletionModel + ?Sized,
{
    if retrieved.is_empty() {
        info!("no retrieved context; emitting the no-answer note");
        return Ok(NO_CONTEXT_ANSWER.to_string());
    }

    let prompt = answer_prompt(question, retrieved);
    let answer = model.complete(&prompt).await?;
    info!(chars = answer.len(), "answer generation complete");
    Ok(answer)
}
