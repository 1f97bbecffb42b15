//! Sentence segmentation for streamed model output
//!
//! Splits buffered text into display-sized sentences and hands back the
//! unterminated tail so the caller can prepend it to the next fragment.
//! Short clauses are glued together up to [`MERGE_BUDGET`] characters.

/// Character budget for a merged sentence chunk
pub const MERGE_BUDGET: usize = 60;

/// Sentence-terminal markers, ASCII and full-width
const MARKERS: &[char] = &['.', '!', '?', ',', '。', '！', '？', '，'];

/// Output of a segmentation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmented {
    /// Complete sentences, merged up to the character budget
    pub sentences: Vec<String>,
    /// Text after the last accepted terminal marker
    pub remainder: String,
}

/// How a marker at the very end of the input is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    /// End of input counts as a boundary
    Terminal,
    /// More text may follow, so a trailing marker is not yet a boundary
    Open,
}

/// Segment a complete text; a trailing marker ends the last sentence.
#[must_use]
pub fn segment(text: &str) -> Segmented {
    let (sentences, remainder) = split(text, Tail::Terminal);
    Segmented {
        sentences: merge_sentences(sentences),
        remainder: remainder.to_string(),
    }
}

/// Segment a stream buffer that may still grow.
///
/// A marker at the very end of `text` is left in the remainder until the
/// next fragment shows whether whitespace follows it (`3.` may become
/// `3.14`). Feeding a stream through this function and finishing with
/// [`segment`] yields the same raw sentences as one [`segment`] call over
/// the whole text.
#[must_use]
pub fn segment_partial(text: &str) -> Segmented {
    let (sentences, remainder) = split(text, Tail::Open);
    Segmented {
        sentences: merge_sentences(sentences),
        remainder: remainder.to_string(),
    }
}

/// Extract raw (unmerged) sentences from a complete text.
///
/// Returns the sentences and the unterminated remainder.
#[must_use]
pub fn split_sentences(text: &str) -> (Vec<String>, &str) {
    split(text, Tail::Terminal)
}

/// Greedily join sentences into chunks of at most [`MERGE_BUDGET`] characters.
///
/// Every chunk ends with a single space. A sentence longer than the budget
/// forms a chunk of its own.
#[must_use]
pub fn merge_sentences(sentences: Vec<String>) -> Vec<String> {
    let mut merged = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0;

    for sentence in sentences {
        let len = sentence.chars().count();
        if !buffer.is_empty() && buffer_chars + len > MERGE_BUDGET {
            merged.push(std::mem::take(&mut buffer));
            buffer_chars = 0;
        }
        buffer.push_str(&sentence);
        buffer.push(' ');
        buffer_chars += len + 1;
    }

    if !buffer.is_empty() {
        merged.push(buffer);
    }

    merged
}

fn split(text: &str, tail: Tail) -> (Vec<String>, &str) {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if !is_marker(c) {
            continue;
        }

        let end = i + c.len_utf8();
        let boundary = match text[end..].chars().next() {
            Some(next) => next.is_whitespace(),
            None => tail == Tail::Terminal,
        };
        if !boundary {
            continue;
        }

        let span = text[start..end].trim();
        if is_noise(span) {
            continue;
        }

        sentences.push(span.to_string());
        start = end;
    }

    (sentences, &text[start..])
}

fn is_marker(c: char) -> bool {
    MARKERS.contains(&c)
}

/// A span made only of digits and punctuation (`1.`, `3,`, `...`)
fn is_noise(span: &str) -> bool {
    span.chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || is_marker(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sentence_at_end_of_input() {
        let out = segment("The weather is sunny today.");
        assert_eq!(out.sentences, vec!["The weather is sunny today. "]);
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_remainder_is_untrimmed_tail() {
        let out = segment("Hello there. How are");
        assert_eq!(out.sentences, vec!["Hello there. "]);
        assert_eq!(out.remainder, " How are");
    }

    #[test]
    fn test_marker_must_be_followed_by_whitespace() {
        let out = segment("Pi is about 3.14 and e is 2.71");
        assert!(out.sentences.is_empty());
        assert_eq!(out.remainder, "Pi is about 3.14 and e is 2.71");
    }

    #[test]
    fn test_numeric_enumeration_is_not_a_sentence() {
        let (sentences, rest) = split_sentences("1. Buy milk. 2. Walk the dog.");
        assert_eq!(sentences, vec!["1. Buy milk.", "2. Walk the dog."]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_ellipsis_alone_is_noise() {
        let (sentences, rest) = split_sentences("... ");
        assert!(sentences.is_empty());
        assert_eq!(rest, "... ");
    }

    #[test]
    fn test_full_width_markers() {
        let (sentences, _) = split_sentences("你好！ 今天天气很好。");
        assert_eq!(sentences, vec!["你好！", "今天天气很好。"]);
    }

    #[test]
    fn test_comma_splits_clauses() {
        let (sentences, rest) = split_sentences("Well, that depends");
        assert_eq!(sentences, vec!["Well,"]);
        assert_eq!(rest, " that depends");
    }

    #[test]
    fn test_merge_respects_budget() {
        let text = "First short one. Second short one. This third sentence is long enough to overflow.";
        let out = segment(text);
        assert_eq!(
            out.sentences,
            vec![
                "First short one. Second short one. ",
                "This third sentence is long enough to overflow. ",
            ]
        );
        assert!(out.sentences.iter().all(|s| s.chars().count() <= MERGE_BUDGET + 1));
    }

    #[test]
    fn test_oversized_sentence_stands_alone() {
        let long = "a".repeat(80) + ".";
        let merged = merge_sentences(vec!["Hi.".to_string(), long.clone(), "Bye.".to_string()]);
        assert_eq!(merged, vec!["Hi. ".to_string(), format!("{long} "), "Bye. ".to_string()]);
    }

    #[test]
    fn test_partial_defers_trailing_marker() {
        let out = segment_partial("Pi is 3.");
        assert!(out.sentences.is_empty());
        assert_eq!(out.remainder, "Pi is 3.");

        let out = segment_partial(&(out.remainder + "14 exactly. And"));
        assert_eq!(out.sentences, vec!["Pi is 3.14 exactly. "]);
        assert_eq!(out.remainder, " And");
    }

    /// Feed `text` in chunks of `size` bytes (on char boundaries), carrying
    /// the remainder forward, then flush with a final `split_sentences`.
    fn raw_sentences_chunked(text: &str, size: usize) -> Vec<String> {
        let mut raw = Vec::new();
        let mut pending = String::new();
        let mut chars = text.chars().peekable();

        while chars.peek().is_some() {
            let piece: String = chars.by_ref().take(size).collect();
            pending.push_str(&piece);
            let (sentences, rest) = split(&pending, Tail::Open);
            raw.extend(sentences);
            pending = rest.to_string();
        }

        let (sentences, _) = split_sentences(&pending);
        raw.extend(sentences);
        raw
    }

    #[test]
    fn test_chunked_feeding_matches_whole_text() {
        let text = "Sure! The meeting is at 3.30 today, right? 1. Bring notes. \
                    2. Bring coffee… Then we can go. 好的。 Done";
        let (whole, _) = split_sentences(text);

        for size in 1..=text.chars().count() {
            assert_eq!(raw_sentences_chunked(text, size), whole, "chunk size {size}");
        }
    }
}
