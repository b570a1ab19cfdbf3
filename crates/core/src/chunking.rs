use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::models::{Chunk, ChunkMeta, DocumentRecord};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_200,
            overlap_chars: 150,
        }
    }
}

/// Splits text into overlapping windows of at most `max_chars` characters.
/// Window ends prefer paragraph breaks, then line breaks, then sentence ends,
/// then word gaps; a window is cut mid-word only when its back half contains
/// no boundary at all.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let max = config.max_chars.max(1);
    let overlap = config.overlap_chars.min(max.saturating_sub(1));
    let chars: Vec<char> = text.chars().collect();

    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + max).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            break_point(&chars, start, hard_end)
        };

        let window: String = chars[start..end].iter().collect();
        let trimmed = window.trim();
        if !trimmed.is_empty() {
            windows.push(trimmed.to_string());
        }

        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    windows
}

fn break_point(chars: &[char], start: usize, hard_end: usize) -> usize {
    // Only break in the back half of the window so windows stay near size.
    let floor = start + (hard_end - start) / 2;

    for end in (floor + 1..=hard_end).rev() {
        if end >= 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n' {
            return end;
        }
    }
    for end in (floor + 1..=hard_end).rev() {
        if chars[end - 1] == '\n' {
            return end;
        }
    }
    for end in (floor + 1..=hard_end).rev() {
        if end >= 2 && chars[end - 2] == '.' && chars[end - 1] == ' ' {
            return end;
        }
    }
    for end in (floor + 1..=hard_end).rev() {
        if chars[end - 1] == ' ' {
            return end;
        }
    }

    hard_end
}

/// Content-hash chunk id: identical text at the same position of the same
/// document re-derives the same id, and distinct documents never collide.
pub fn make_chunk_id(doc_key: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_key.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Builds the flat chunk sequence for a run. Documents whose text is empty or
/// whitespace are logged and skipped without failing the run.
pub fn build_chunks(documents: &[(DocumentRecord, String)], config: ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (record, text) in documents {
        if text.trim().is_empty() {
            warn!(source = %record.source, "skipping chunking for empty document text");
            continue;
        }

        for (index, window) in split_text(text, config).into_iter().enumerate() {
            let id = make_chunk_id(&record.doc_key, index, &window);
            chunks.push(Chunk {
                id,
                text: window,
                meta: ChunkMeta {
                    doc: record.source.clone(),
                    doc_key: record.doc_key.clone(),
                    doc_ordinal: record.ordinal,
                },
            });
        }
    }

    info!(
        chunk_count = chunks.len(),
        documents = documents.len(),
        "chunking complete"
    );
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::doc_key;
    use chrono::Utc;

    fn record(source: &str, ordinal: usize) -> DocumentRecord {
        DocumentRecord {
            source: source.to_string(),
            doc_key: doc_key(source),
            ordinal,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn windows_never_exceed_the_configured_size() {
        let config = ChunkingConfig {
            max_chars: 100,
            overlap_chars: 20,
        };
        let text = "The fund seeks to track the performance of its benchmark index. ".repeat(40);
        let windows = split_text(&text, config);

        assert!(windows.len() > 1);
        assert!(windows.iter().all(|w| w.chars().count() <= 100));
    }

    #[test]
    fn boundary_free_text_overlaps_by_exactly_the_configured_amount() {
        let config = ChunkingConfig {
            max_chars: 100,
            overlap_chars: 20,
        };
        let text = "a".repeat(250);
        let windows = split_text(&text, config);

        assert!(windows.len() >= 2);
        for pair in windows.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 20).collect();
            let head: String = pair[1].chars().take(20).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn word_gaps_are_preferred_over_mid_word_cuts() {
        let config = ChunkingConfig {
            max_chars: 12,
            overlap_chars: 0,
        };
        let text = "word ".repeat(30);
        let windows = split_text(&text, config);

        assert!(!windows.is_empty());
        assert!(windows.iter().all(|w| w.split(' ').all(|t| t == "word")));
    }

    #[test]
    fn empty_documents_yield_zero_chunks() {
        let documents = vec![
            (record("empty.pdf", 0), "   \n  ".to_string()),
            (record("spy.pdf", 1), "Expense Ratio: 0.03%".to_string()),
        ];
        let chunks = build_chunks(&documents, ChunkingConfig::default());

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].meta.doc, "spy.pdf");
        assert_eq!(chunks[0].meta.doc_ordinal, 1);
    }

    #[test]
    fn chunk_ids_are_content_addressed_and_document_scoped() {
        let text = "Expense Ratio: 0.03%";
        let first = make_chunk_id(&doc_key("spy.pdf"), 0, text);
        let again = make_chunk_id(&doc_key("spy.pdf"), 0, text);
        let other_doc = make_chunk_id(&doc_key("voo.pdf"), 0, text);

        assert_eq!(first, again);
        assert_ne!(first, other_doc);
    }
}
