//! Context packing: greedily select retrieved chunks under a character
//! budget (`spec.md` §4.4 step 4).
use crate::model::SearchResult;

use super::types::Source;

/// Minimum length a truncated final candidate must retain to be kept.
const MIN_TRUNCATED_LEN: usize = 200;

/// Result of packing retrieved chunks into a bounded context string.
pub struct PackedContext {
    /// The assembled context text, ready to splice into a prompt template.
    pub text: String,
    /// Sources actually used, in the order they were packed.
    pub sources: Vec<Source>,
}

/// Greedily append `results` (already sorted by descending score) as
/// `"Document i: filename (Relevance: s) | Chunk c | Content: ..."` headers
/// until `max_context_length` would be exceeded. The final candidate may be
/// truncated at a sentence boundary if ≥ [`MIN_TRUNCATED_LEN`] chars survive,
/// else it is skipped entirely.
pub fn pack_context(results: &[SearchResult], max_context_length: usize) -> PackedContext {
    let mut text = String::new();
    let mut sources = Vec::new();

    for (index, result) in results.iter().enumerate() {
        let file_name = result
            .payload
            .metadata
            .get("file_name")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let header = format!(
            "Document {}: {} (Relevance: {:.2}) | Chunk {} | Content: ",
            index + 1,
            file_name,
            result.score,
            result.payload.chunk_index
        );
        let mut entry = header.clone();
        entry.push_str(&result.payload.text);

        let remaining = max_context_length.saturating_sub(text.chars().count());
        if entry.chars().count() <= remaining {
            text.push_str(&entry);
            text.push_str("\n\n");
            sources.push(source_from(result, &file_name));
            continue;
        }

        let header_len = header.chars().count();
        if remaining <= header_len + MIN_TRUNCATED_LEN {
            break;
        }
        let content_budget = remaining - header_len;
        let truncated_content = truncate_at_sentence_boundary(&result.payload.text, content_budget);
        if truncated_content.chars().count() < MIN_TRUNCATED_LEN {
            break;
        }
        text.push_str(&header);
        text.push_str(&truncated_content);
        sources.push(source_from(result, &file_name));
        break;
    }

    PackedContext { text, sources }
}

fn source_from(result: &SearchResult, file_name: &str) -> Source {
    Source {
        chunk_id: result.chunk_id.clone(),
        file_name: file_name.to_string(),
        snippet: result.payload.content_preview.clone(),
        score: result.score,
    }
}

fn truncate_at_sentence_boundary(text: &str, budget: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let window = chars[..budget].to_vec();
    for i in (0..window.len()).rev() {
        if matches!(window[i], '.' | '!' | '?') {
            return window[..=i].iter().collect();
        }
    }
    window.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, now_ms};
    use std::collections::HashMap;

    fn result(id: &str, score: f32, text: &str, file_name: &str) -> SearchResult {
        let mut metadata = HashMap::new();
        metadata.insert("file_name".to_string(), file_name.to_string());
        SearchResult {
            chunk_id: id.to_string(),
            score,
            payload: Chunk {
                id: id.to_string(),
                source_document_id: "doc".to_string(),
                chunk_index: 0,
                text: text.to_string(),
                start_char: 0,
                end_char: text.len(),
                byte_size: text.len(),
                word_count: text.split_whitespace().count(),
                sentence_count: 1,
                created_at: now_ms(),
                content_preview: text.chars().take(100).collect(),
                metadata,
            },
        }
    }

    #[test]
    fn packs_all_results_within_budget() {
        let results = vec![result("a", 0.9, "first chunk text.", "f.txt"), result("b", 0.8, "second chunk text.", "f.txt")];
        let packed = pack_context(&results, 4000);
        assert_eq!(packed.sources.len(), 2);
        assert!(packed.text.contains("Document 1"));
        assert!(packed.text.contains("Document 2"));
    }

    #[test]
    fn stops_when_budget_exhausted() {
        let long_chunk = "Sentence one here. ".repeat(50);
        let results = vec![result("a", 0.9, &long_chunk, "f.txt"), result("b", 0.8, &long_chunk, "f.txt")];
        let packed = pack_context(&results, 300);
        assert!(packed.sources.len() <= 2);
        assert!(packed.text.chars().count() <= 350);
    }

    #[test]
    fn empty_results_yield_empty_context() {
        let packed = pack_context(&[], 4000);
        assert!(packed.text.is_empty());
        assert!(packed.sources.is_empty());
    }
}
