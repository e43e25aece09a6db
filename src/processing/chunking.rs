//! Character-offset-based, sentence-aware chunking (`spec.md` §4.3 "Chunking
//! algorithm"). Operates purely on normalized text and `char` offsets; it has
//! no notion of tokens or model context windows.

use super::types::ChunkingError;

/// Characters treated as sentence terminators when searching for a cut point.
const SENTENCE_ENDERS: [char; 3] = ['.', '!', '?'];

/// One emitted chunk: the slice text plus its offsets into the normalized source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Inclusive start offset, in characters.
    pub start_char: usize,
    /// Exclusive end offset, in characters.
    pub end_char: usize,
    /// The chunk's text (`text[start_char..end_char]` in char units).
    pub text: String,
}

/// Collapse runs of whitespace to single spaces while preserving paragraph
/// breaks (blank lines) as a double newline, per `spec.md` §4.3 step 1.
pub fn normalize_whitespace(input: &str) -> String {
    let mut normalized = String::with_capacity(input.len());
    let mut blank_run = 0usize;
    for raw_line in input.split('\n') {
        let line = raw_line.trim();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !normalized.is_empty() {
            if blank_run > 0 {
                normalized.push_str("\n\n");
            } else {
                normalized.push(' ');
            }
        }
        blank_run = 0;
        let mut prev_space = false;
        for ch in line.chars() {
            if ch.is_whitespace() {
                if !prev_space {
                    normalized.push(' ');
                }
                prev_space = true;
            } else {
                normalized.push(ch);
                prev_space = false;
            }
        }
    }
    normalized
}

/// Split normalized `text` into chunks of at most `chunk_size` characters,
/// overlapping by `chunk_overlap` characters, cutting on sentence boundaries
/// where one can be found near the stride boundary.
///
/// Rejects documents that would yield more than `max_chunks_per_document`
/// chunks rather than silently truncating.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    max_chunks_per_document: usize,
) -> Result<Vec<ChunkSpan>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if chunk_overlap >= chunk_size {
        return Err(ChunkingError::InvalidOverlap { overlap: chunk_overlap, chunk_size });
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    // Step 2: single-chunk shortcut.
    if len <= chunk_size {
        return Ok(vec![ChunkSpan { start_char: 0, end_char: len, text: text.to_string() }]);
    }

    let backward_window = chunk_size.min(100).min(chunk_size / 2).max(1);
    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < len {
        let stride_end = (start + chunk_size).min(len);
        let end = if stride_end == len {
            len
        } else {
            find_sentence_cut(&chars, stride_end, backward_window).unwrap_or(stride_end)
        };
        let end = end.max(start + 1);
        let slice: String = chars[start..end].iter().collect();
        spans.push(ChunkSpan { start_char: start, end_char: end, text: slice });

        if spans.len() > max_chunks_per_document {
            return Err(ChunkingError::TooManyChunks { actual: spans.len(), limit: max_chunks_per_document });
        }

        if end >= len {
            break;
        }

        // Step 4: next chunk starts at `previous_end - chunk_overlap`, never
        // before the previous chunk's start (guarantees forward progress).
        let next_start = end.saturating_sub(chunk_overlap);
        start = next_start.max(start + 1);
    }

    Ok(spans)
}

/// Search backward from `stride_end` (exclusive) up to `window` characters
/// for a sentence-ending punctuation mark, returning the offset just after it.
fn find_sentence_cut(chars: &[char], stride_end: usize, window: usize) -> Option<usize> {
    let floor = stride_end.saturating_sub(window);
    let mut i = stride_end;
    while i > floor {
        i -= 1;
        if SENTENCE_ENDERS.contains(&chars[i]) {
            return Some(i + 1);
        }
    }
    None
}

/// Count words by whitespace splitting, used for [`crate::model::Chunk::word_count`]
/// and document-level metadata.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Count sentences by counting sentence-ending punctuation runs.
pub fn sentence_count(text: &str) -> usize {
    let mut count = 0usize;
    let mut prev_ender = false;
    for ch in text.chars() {
        let is_ender = SENTENCE_ENDERS.contains(&ch);
        if is_ender && !prev_ender {
            count += 1;
        }
        prev_ender = is_ender;
    }
    if count == 0 && !text.trim().is_empty() {
        count = 1;
    }
    count
}

/// Count paragraphs, delimited by the double newlines [`normalize_whitespace`] emits.
pub fn paragraph_count(text: &str) -> usize {
    let count = text.split("\n\n").filter(|p| !p.trim().is_empty()).count();
    count.max(if text.trim().is_empty() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace_and_preserves_paragraphs() {
        let input = "Hello   world.\n\n\nSecond   paragraph.\nstill second.";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "Hello world.\n\nSecond paragraph. still second.");
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let spans = chunk_text("short text", 100, 10, 10).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_char, 0);
        assert_eq!(spans[0].end_char, 10);
    }

    #[test]
    fn long_text_is_split_on_sentence_boundaries() {
        let text = "Alpha bravo charlie delta. Echo foxtrot golf hotel. India juliet kilo lima. Mike november oscar papa.";
        let spans = chunk_text(text, 40, 10, 50).unwrap();
        assert!(spans.len() > 1);
        for span in &spans {
            assert!(span.text.len() <= 45, "chunk exceeded expected bound: {:?}", span.text);
        }
        // Every chunk but the last should end right after a sentence-ending mark.
        for span in &spans[..spans.len() - 1] {
            let last = span.text.chars().last().unwrap();
            assert!(SENTENCE_ENDERS.contains(&last), "chunk didn't end on sentence boundary: {:?}", span.text);
        }
    }

    #[test]
    fn overlap_never_moves_start_backward_past_previous_start() {
        let text = "a".repeat(500);
        let spans = chunk_text(&text, 50, 49, 100).unwrap();
        for window in spans.windows(2) {
            assert!(window[1].start_char > window[0].start_char);
        }
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let error = chunk_text("text", 0, 0, 10).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let error = chunk_text("text", 10, 10, 10).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidOverlap { .. }));
    }

    #[test]
    fn rejects_documents_exceeding_max_chunks() {
        let text = "word ".repeat(10_000);
        let error = chunk_text(&text, 10, 2, 5).unwrap_err();
        assert!(matches!(error, ChunkingError::TooManyChunks { .. }));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let spans = chunk_text("", 100, 10, 10).unwrap();
        assert!(spans.is_empty());
    }
}
