//! Template labels for classified conversations.
//!
//! `"<Category>[ / <subcategory>]: <content words>"`, built from the
//! dominant span. Pure string work, so identical input always yields the
//! identical label.

use quarry_core::{Category, NormalizedConversation, SpanKind};

/// Content words taken from the dominant text.
const MAX_CONTENT_WORDS: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "anyone", "are",
    "as", "at", "be", "been", "but", "by", "can", "could", "did", "do", "does", "for", "from",
    "get", "got", "had", "has", "have", "how", "i", "i'm", "if", "in", "into", "is", "it",
    "it's", "its", "just", "keeps", "like", "me", "my", "no", "not", "of", "on", "or", "our",
    "out", "really", "should", "so", "some", "still", "than", "that", "the", "their", "them",
    "then", "there", "they", "this", "to", "too", "up", "very", "was", "we", "were", "what",
    "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Text the label is derived from: the first question span, else the first
/// phrase, else the first answer, else the whole cleaned text.
pub fn dominant_text(conversation: &NormalizedConversation) -> &str {
    [SpanKind::Question, SpanKind::Phrase, SpanKind::Answer]
        .into_iter()
        .find_map(|kind| conversation.spans.iter().find(|s| s.kind == kind))
        .map(|s| s.text.as_str())
        .unwrap_or(&conversation.clean_text)
}

fn content_words(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for token in text.split(|c: char| !c.is_alphanumeric() && c != '\'') {
        let word = token.trim_matches('\'').to_lowercase();
        if word.chars().count() < 3 && !word.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if word.is_empty() || STOPWORDS.contains(&word.as_str()) || words.contains(&word) {
            continue;
        }
        words.push(word);
        if words.len() == MAX_CONTENT_WORDS {
            break;
        }
    }
    words
}

/// Build the label for one conversation. At most eight words.
pub fn generate_label(
    category: Category,
    subcategory: Option<&str>,
    conversation: &NormalizedConversation,
) -> String {
    let mut head = category.display_name().to_string();
    if let Some(sub) = subcategory {
        head.push_str(" / ");
        head.push_str(sub);
    }

    let words = content_words(dominant_text(conversation));
    if words.is_empty() {
        head
    } else {
        format!("{head}: {}", words.join(" "))
    }
}
