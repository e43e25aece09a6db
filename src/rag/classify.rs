//! Keyword-heuristic query classification (`spec.md` §4.4 step 1).
use super::types::QueryType;

const FACTUAL_KEYWORDS: [&str; 4] = ["what", "when", "where", "who"];
const ANALYTICAL_KEYWORDS: [&str; 3] = ["analyze", "explain", "why"];
const COMPARATIVE_KEYWORDS: [&str; 2] = ["compare", "difference"];
const SUMMARIZATION_KEYWORDS: [&str; 2] = ["summarize", "summary"];
const CREATIVE_KEYWORDS: [&str; 3] = ["create", "design", "imagine"];

/// Classify `query_text` into a [`QueryType`] by keyword presence, checked in
/// the fixed precedence order the spec defines.
pub fn classify(query_text: &str) -> QueryType {
    let lower = query_text.to_ascii_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|word| contains_word(&lower, word));

    if has_any(&FACTUAL_KEYWORDS) {
        QueryType::Factual
    } else if has_any(&ANALYTICAL_KEYWORDS) {
        QueryType::Analytical
    } else if has_any(&COMPARATIVE_KEYWORDS) {
        QueryType::Comparative
    } else if has_any(&SUMMARIZATION_KEYWORDS) {
        QueryType::Summarization
    } else if has_any(&CREATIVE_KEYWORDS) {
        QueryType::Creative
    } else {
        QueryType::General
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric()).any(|token| token == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_factual_questions() {
        assert_eq!(classify("What is the vacation policy?"), QueryType::Factual);
        assert_eq!(classify("Who approved this budget"), QueryType::Factual);
    }

    #[test]
    fn classifies_analytical_and_comparative_and_summarization_and_creative() {
        assert_eq!(classify("Please analyze this report"), QueryType::Analytical);
        assert_eq!(classify("compare plan A and plan B"), QueryType::Comparative);
        assert_eq!(classify("give me a summary"), QueryType::Summarization);
        assert_eq!(classify("create a new onboarding flow"), QueryType::Creative);
    }

    #[test]
    fn falls_back_to_general() {
        assert_eq!(classify("vacation policy"), QueryType::General);
    }

    #[test]
    fn does_not_match_substrings_inside_other_words() {
        assert_eq!(classify("whatever happens happens"), QueryType::General);
    }
}
