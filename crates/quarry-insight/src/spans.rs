//! Span extraction over cleaned text.
//!
//! Sentences are found with punctuation heuristics, then labeled as
//! questions, answers or key phrases. Offsets are byte ranges into the
//! cleaned text and always land on char boundaries.

use quarry_core::config::SpanConfig;
use quarry_core::{Span, SpanKind};

/// Words that open a question even without a trailing `?`.
pub(crate) const QUESTION_OPENERS: &[&str] = &[
    "how", "what", "why", "when", "where", "who", "which", "is", "are", "can", "could",
    "should", "would", "does", "do", "did", "will", "has", "have", "anyone", "any",
];

/// Markers of a proposed fix or workaround.
pub(crate) const SOLUTION_MARKERS: &[&str] = &[
    "try",
    "you can",
    "solution",
    "fix",
    "fixed",
    "worked for me",
    "works for me",
    "workaround",
    "steps",
    "instead",
    "solved",
    "resolved",
];

/// Pain keywords grouped by area; groups double as subcategory hints.
pub(crate) const PAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "error",
        &[
            "error",
            "exception",
            "fail",
            "fails",
            "failing",
            "crash",
            "bug",
            "issue",
            "problem",
            "broken",
        ],
    ),
    (
        "performance",
        &[
            "slow",
            "lag",
            "timeout",
            "hang",
            "freeze",
            "performance",
            "latency",
            "throughput",
        ],
    ),
    (
        "usability",
        &[
            "confusing",
            "unclear",
            "hard",
            "difficult",
            "complex",
            "complicated",
            "unintuitive",
        ],
    ),
    (
        "compatibility",
        &[
            "incompatible",
            "not working",
            "doesn't work",
            "conflict",
            "compatibility",
        ],
    ),
    (
        "cost",
        &[
            "expensive",
            "costly",
            "price",
            "billing",
            "overcharge",
            "fee",
            "subscription",
        ],
    ),
];

/// Promotional sentences are never key phrases.
const PROMOTIONAL_TERMS: &[&str] = &[
    "love",
    "amazing",
    "awesome",
    "wonderful",
    "excellent",
    "perfect",
];

/// Whether `needle` occurs in `haystack` (both lowercase) on word boundaries.
pub(crate) fn contains_term(haystack: &str, needle: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        from = start + needle.len().max(1);
        while from < haystack.len() && !haystack.is_char_boundary(from) {
            from += 1;
        }
        if from >= haystack.len() {
            break;
        }
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Byte ranges of sentences in `text`, trimmed of surrounding whitespace.
///
/// A sentence ends after a run of `.`, `!` or `?` that is followed by
/// whitespace or the end of the text.
pub fn sentence_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if matches!(next, '.' | '!' | '?') {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let at_boundary = text[end..].chars().next().map_or(true, char::is_whitespace);
        if at_boundary {
            push_trimmed(text, start, end, &mut ranges);
            start = end;
        }
    }
    push_trimmed(text, start, text.len(), &mut ranges);
    ranges
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead + trail < slice.len() {
        out.push((start + lead, end - trail));
    }
}

fn is_question(sentence: &str) -> bool {
    if sentence.trim_end().ends_with('?') {
        return true;
    }
    sentence
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .is_some_and(|w| QUESTION_OPENERS.contains(&w.as_str()))
}

pub(crate) fn has_solution_marker(lower: &str) -> bool {
    SOLUTION_MARKERS.iter().any(|m| contains_term(lower, m))
}

pub(crate) fn has_pain_keyword(lower: &str) -> bool {
    PAIN_KEYWORDS
        .iter()
        .any(|(_, words)| words.iter().any(|w| contains_term(lower, w)))
}

fn is_promotional(lower: &str) -> bool {
    PROMOTIONAL_TERMS.iter().any(|t| contains_term(lower, t))
}

/// Labels sentences of cleaned text as question, answer or phrase spans.
#[derive(Debug, Clone)]
pub struct SpanExtractor {
    config: SpanConfig,
}

impl SpanExtractor {
    pub fn new(config: SpanConfig) -> Self {
        Self { config }
    }

    /// Extract spans in text order.
    ///
    /// - Question: ends with `?` or opens with an interrogative word.
    /// - Answer: carries a solution marker and either the record is a reply
    ///   or the previous sentence was a question.
    /// - Phrase: carries a pain or solution keyword, is long enough and not
    ///   promotional. At most `max_phrases`.
    pub fn extract(&self, clean_text: &str, is_reply: bool) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut phrases = 0;
        let mut prev_question = false;

        for (start, end) in sentence_ranges(clean_text) {
            let sentence = &clean_text[start..end];
            let lower = sentence.to_lowercase();
            let question = is_question(sentence);
            let solution = has_solution_marker(&lower);

            let kind = if question {
                Some(SpanKind::Question)
            } else if solution && (is_reply || prev_question) {
                Some(SpanKind::Answer)
            } else if phrases < self.config.max_phrases
                && sentence.split_whitespace().count() >= self.config.min_phrase_words
                && (has_pain_keyword(&lower) || solution)
                && !is_promotional(&lower)
            {
                phrases += 1;
                Some(SpanKind::Phrase)
            } else {
                None
            };

            if let Some(kind) = kind {
                spans.push(self.span(clean_text, kind, start, end));
            }
            prev_question = question;
        }
        spans
    }

    /// Keeps at most `max_span_chars` characters of `text[start..end]`.
    fn span(&self, text: &str, kind: SpanKind, start: usize, end: usize) -> Span {
        let sentence = &text[start..end];
        let cut = sentence
            .char_indices()
            .nth(self.config.max_span_chars)
            .map_or(sentence.len(), |(i, _)| i);
        let slice = sentence[..cut].trim_end();
        let end = start + slice.len();
        Span {
            kind,
            text: slice.to_string(),
            start,
            end,
        }
    }
}

impl Default for SpanExtractor {
    fn default() -> Self {
        Self::new(SpanConfig::default())
    }
}
