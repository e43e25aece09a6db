//! Pure prompt assembly (`spec.md` §4.5 "PromptEngine"): six intent-specific
//! templates plus a `fallback` template for empty context. `build` has no
//! I/O and is deterministic given its inputs.
use super::types::{QueryType, ResponseFormat, SafetyLevel};

/// Render the safety instruction block for `level`.
fn safety_block(level: SafetyLevel) -> &'static str {
    match level {
        SafetyLevel::Standard => {
            "Answer helpfully and factually. Decline requests for clearly harmful, illegal, or \
             unsafe content."
        }
        SafetyLevel::Conservative => {
            "Be cautious. Refuse anything that could be interpreted as harmful, unsafe, or \
             policy-violating, even if the risk is only plausible. Prefer declining over guessing."
        }
        SafetyLevel::Permissive => {
            "Answer directly and candidly. Only refuse requests that are unambiguously illegal or \
             dangerous."
        }
    }
}

/// Render the format instruction block for `format`.
fn format_block(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Text => "Respond in plain prose.",
        ResponseFormat::BulletPoints => "Respond as a Markdown bullet list with at least 3 items.",
        ResponseFormat::NumberedList => "Respond as a Markdown numbered list with at least 3 items.",
        ResponseFormat::Table => "Respond as a Markdown table with a header row.",
        ResponseFormat::Json => "Respond with a single JSON object and no surrounding prose.",
        ResponseFormat::Summary => "Respond with a brief, condensed summary of at most 3 sentences.",
    }
}

fn template_for(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::General => {
            "{safety}\n\nUse the following context to answer the question. If the context does \
             not contain the answer, say so.\n\nContext:\n{context}\n\nQuestion: {query}\n\n{format}"
        }
        QueryType::Factual => {
            "{safety}\n\nAnswer the factual question using only the context below. Be precise and \
             cite specifics (names, dates, numbers) when present.\n\nContext:\n{context}\n\nQuestion: \
             {query}\n\n{format}"
        }
        QueryType::Analytical => {
            "{safety}\n\nAnalyze the context below to answer the question. Explain your reasoning \
             and the relationships between the facts you cite.\n\nContext:\n{context}\n\nQuestion: \
             {query}\n\n{format}"
        }
        QueryType::Comparative => {
            "{safety}\n\nCompare the relevant items described in the context below, highlighting \
             similarities and differences relevant to the question.\n\nContext:\n{context}\n\n\
             Question: {query}\n\n{format}"
        }
        QueryType::Summarization => {
            "{safety}\n\nSummarize the context below as it relates to the question, keeping only \
             the most relevant points.\n\nContext:\n{context}\n\nQuestion: {query}\n\n{format}"
        }
        QueryType::Creative => {
            "{safety}\n\nUse the context below as inspiration and grounding to creatively address \
             the request.\n\nContext:\n{context}\n\nRequest: {query}\n\n{format}"
        }
    }
}

const FALLBACK_TEMPLATE: &str = "{safety}\n\nNo relevant context was found for this question. \
     Answer from general knowledge if you can do so confidently, and explicitly say that no \
     supporting documents were found. Do not invent citations.\n\nQuestion: {query}\n\n{format}";

/// Assemble the final prompt string for `query_type`/`safety_level`/`response_format`
/// over `context`/`query`. Uses the `fallback` template when `context` is empty.
pub fn build(
    query_type: QueryType,
    safety_level: SafetyLevel,
    response_format: ResponseFormat,
    context: &str,
    query: &str,
) -> String {
    let template = if context.trim().is_empty() { FALLBACK_TEMPLATE } else { template_for(query_type) };
    template
        .replace("{safety}", safety_block(safety_level))
        .replace("{format}", format_block(response_format))
        .replace("{context}", context)
        .replace("{query}", query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_deterministic() {
        let a = build(QueryType::Factual, SafetyLevel::Standard, ResponseFormat::Text, "ctx", "q");
        let b = build(QueryType::Factual, SafetyLevel::Standard, ResponseFormat::Text, "ctx", "q");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_context_uses_fallback_template() {
        let prompt = build(QueryType::General, SafetyLevel::Standard, ResponseFormat::Text, "", "hello");
        assert!(prompt.contains("No relevant context was found"));
        assert!(prompt.contains("hello"));
    }

    #[test]
    fn bullet_format_requests_at_least_three_items() {
        let prompt = build(QueryType::General, SafetyLevel::Standard, ResponseFormat::BulletPoints, "ctx", "q");
        assert!(prompt.contains("at least 3 items"));
    }

    #[test]
    fn conservative_safety_level_is_more_cautious_than_permissive() {
        let conservative = build(QueryType::General, SafetyLevel::Conservative, ResponseFormat::Text, "ctx", "q");
        let permissive = build(QueryType::General, SafetyLevel::Permissive, ResponseFormat::Text, "ctx", "q");
        assert!(conservative.contains("cautious"));
        assert!(permissive.contains("candidly"));
    }
}
