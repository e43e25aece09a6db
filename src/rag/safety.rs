//! Post-generation validation: safety scan, context adherence, and quality
//! checks (`spec.md` §4.4 step 7).
use std::collections::HashSet;

use super::types::{ResponseFormat, ValidationStatus};

/// Crude but deterministic harmful-content patterns. A production deployment
/// would load these from a maintained policy file; a fixed set keeps this
/// pure and testable.
const HARMFUL_PATTERNS: [&str; 6] = [
    "how to make a bomb",
    "how to synthesize",
    "kill yourself",
    "credit card number:",
    "build a weapon",
    "child sexual abuse",
];

const GENERIC_RESPONSES: [&str; 3] = ["i don't know.", "n/a", "i don't know"];
const MIN_QUALITY_LENGTH: usize = 20;
const ADHERENCE_WARN_THRESHOLD: f32 = 0.15;

/// Scan `answer` against the harmful-content pattern set. `1.0` means clean;
/// `0.0` means a pattern matched.
pub fn safety_score(answer: &str) -> f32 {
    let lower = answer.to_ascii_lowercase();
    if HARMFUL_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        0.0
    } else {
        1.0
    }
}

/// Token-set overlap between `answer` and `context`, as a fraction of the
/// answer's distinct tokens. Returns `1.0` when `context` is empty (no
/// adherence check applies to a fallback answer).
pub fn context_adherence(answer: &str, context: &str) -> f32 {
    let answer_tokens: HashSet<String> = tokenize(answer);
    if answer_tokens.is_empty() {
        return 1.0;
    }
    if context.trim().is_empty() {
        return 1.0;
    }
    let context_tokens: HashSet<String> = tokenize(context);
    let overlap = answer_tokens.intersection(&context_tokens).count();
    overlap as f32 / answer_tokens.len() as f32
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(|token| token.to_string())
        .collect()
}

/// Whether `answer` meets the minimum quality bar for its requested format.
fn passes_quality(answer: &str, format: ResponseFormat) -> bool {
    let trimmed = answer.trim();
    if trimmed.chars().count() < MIN_QUALITY_LENGTH {
        return false;
    }
    if GENERIC_RESPONSES.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return false;
    }
    match format {
        ResponseFormat::BulletPoints => count_lines_starting_with(trimmed, &['-', '*']) >= 3,
        ResponseFormat::NumberedList => count_numbered_lines(trimmed) >= 3,
        ResponseFormat::Table => trimmed.contains('|'),
        ResponseFormat::Json => trimmed.starts_with('{') && trimmed.ends_with('}'),
        _ => true,
    }
}

fn count_lines_starting_with(text: &str, markers: &[char]) -> usize {
    text.lines().filter(|line| markers.iter().any(|marker| line.trim_start().starts_with(*marker))).count()
}

fn count_numbered_lines(text: &str) -> usize {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.chars().next().is_some_and(|c| c.is_ascii_digit()) && trimmed.contains('.')
        })
        .count()
}

/// Full validation outcome: the aggregated status plus the component scores.
pub struct Validation {
    /// Worst of {safety, adherence, quality}.
    pub status: ValidationStatus,
    /// Safety scan score.
    pub safety_score: f32,
    /// Context-adherence ratio.
    pub adherence: f32,
}

/// Run every check on `answer` and aggregate into a [`Validation`].
pub fn validate(answer: &str, context: &str, sources_non_empty: bool, format: ResponseFormat) -> Validation {
    let safety = safety_score(answer);
    let adherence = context_adherence(answer, context);

    let mut status = if safety < 1.0 { ValidationStatus::Error } else { ValidationStatus::Valid };

    if sources_non_empty && adherence < ADHERENCE_WARN_THRESHOLD {
        status = status.worst(ValidationStatus::Warning);
    }
    if !passes_quality(answer, format) {
        status = status.worst(ValidationStatus::Warning);
    }

    Validation { status, safety_score: safety, adherence }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_answer_scores_one() {
        assert_eq!(safety_score("The vacation policy allows 20 days per year."), 1.0);
    }

    #[test]
    fn harmful_pattern_scores_zero() {
        assert_eq!(safety_score("Here is how to make a bomb at home."), 0.0);
    }

    #[test]
    fn adherence_measures_token_overlap() {
        let context = "the vacation policy allows twenty days per year for staff";
        let answer = "the vacation policy allows twenty days per year";
        assert!(context_adherence(answer, context) > 0.8);
    }

    #[test]
    fn generic_short_answers_fail_quality() {
        let validation = validate("I don't know.", "some context", true, ResponseFormat::Text);
        assert_eq!(validation.status, ValidationStatus::Warning);
    }

    #[test]
    fn bullet_format_requires_three_bullets() {
        let answer = "- one\n- two";
        let validation = validate(answer, "context text here", true, ResponseFormat::BulletPoints);
        assert_eq!(validation.status, ValidationStatus::Warning);
    }

    #[test]
    fn unsafe_answer_is_an_error() {
        let validation = validate("here is how to make a bomb", "", false, ResponseFormat::Text);
        assert_eq!(validation.status, ValidationStatus::Error);
    }
}
