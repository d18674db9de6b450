use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuarryError;

// =============================================================================
// Enums
// =============================================================================

/// Kind of a labeled substring inside a conversation's cleaned text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Question,
    Answer,
    /// Key phrase carrying a pain point or a solution keyword.
    Phrase,
}

/// Topic/intent category. Exactly one per classified conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Question,
    Answer,
    Praise,
    Complaint,
    Suggestion,
    Comparison,
    Agreement,
    Disagreement,
    Sharing,
    Statement,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 10] = [
        Category::Question,
        Category::Answer,
        Category::Praise,
        Category::Complaint,
        Category::Suggestion,
        Category::Comparison,
        Category::Agreement,
        Category::Disagreement,
        Category::Sharing,
        Category::Statement,
    ];

    /// Tie-break order for equal signal scores, strongest first.
    pub const PRIORITY: [Category; 10] = [
        Category::Question,
        Category::Answer,
        Category::Suggestion,
        Category::Comparison,
        Category::Complaint,
        Category::Praise,
        Category::Agreement,
        Category::Disagreement,
        Category::Sharing,
        Category::Statement,
    ];

    /// Position in [`Category::PRIORITY`]; lower wins.
    pub fn priority(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|c| *c == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Question => "question",
            Category::Answer => "answer",
            Category::Praise => "praise",
            Category::Complaint => "complaint",
            Category::Suggestion => "suggestion",
            Category::Comparison => "comparison",
            Category::Agreement => "agreement",
            Category::Disagreement => "disagreement",
            Category::Sharing => "sharing",
            Category::Statement => "statement",
        }
    }

    /// Capitalized name used in labels.
    pub fn display_name(self) -> &'static str {
        match self {
            Category::Question => "Question",
            Category::Answer => "Answer",
            Category::Praise => "Praise",
            Category::Complaint => "Complaint",
            Category::Suggestion => "Suggestion",
            Category::Comparison => "Comparison",
            Category::Agreement => "Agreement",
            Category::Disagreement => "Disagreement",
            Category::Sharing => "Sharing",
            Category::Statement => "Statement",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| QuarryError::Config(format!("unknown category: {s}")))
    }
}

/// Coarse keyword polarity attached to each classified conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

/// Ordinal severity of an insight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl FromStr for Severity {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(QuarryError::Backend(format!("unknown severity: {other}"))),
        }
    }
}

// =============================================================================
// Ingest
// =============================================================================

/// One raw question/answer interaction as handed over by data preparation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Stable, caller-assigned id.
    pub id: String,
    /// Raw text before normalization.
    pub text: String,
    /// Community or source tag.
    #[serde(default)]
    pub community: Option<String>,
    /// Engagement score.
    #[serde(default)]
    pub upvotes: i64,
    pub timestamp: DateTime<Utc>,
    /// Id of the record this one replies to, if any.
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>, upvotes: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            community: None,
            upvotes,
            timestamp: Utc::now(),
            parent_id: None,
        }
    }

    pub fn with_community(mut self, community: impl Into<String>) -> Self {
        self.community = Some(community.into());
        self
    }

    pub fn in_reply_to(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Whitespace-separated word count of the raw text.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

// =============================================================================
// Stage outputs
// =============================================================================

/// An item removed from downstream stages because it failed integrity checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub item_id: String,
    pub reason: String,
}

impl Exclusion {
    pub fn new(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            reason: reason.into(),
        }
    }
}

/// A labeled substring of [`NormalizedConversation::clean_text`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub kind: SpanKind,
    pub text: String,
    /// Byte offset where the span starts in the cleaned text.
    pub start: usize,
    /// Byte offset one past the end of the span.
    pub end: usize,
}

impl Span {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Cleaned, filtered and span-annotated conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedConversation {
    pub id: String,
    pub clean_text: String,
    pub spans: Vec<Span>,
    /// ISO-639-1 code reported by the language detector.
    pub language: String,
    pub community: Option<String>,
    pub upvotes: i64,
    pub timestamp: DateTime<Utc>,
    pub is_reply: bool,
}

impl NormalizedConversation {
    /// Every span resolves inside `clean_text` and matches its text.
    pub fn spans_are_consistent(&self) -> bool {
        self.spans.iter().all(|s| {
            self.clean_text
                .get(s.range())
                .is_some_and(|slice| slice == s.text)
        })
    }
}

/// Normalized conversation plus category, optional subcategory and label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedConversation {
    pub conversation: NormalizedConversation,
    pub category: Category,
    pub subcategory: Option<String>,
    pub label: String,
    pub sentiment: Sentiment,
}

impl ClassifiedConversation {
    pub fn id(&self) -> &str {
        &self.conversation.id
    }
}

/// Fixed-length vector produced by one embedding backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub owner_id: String,
    pub values: Vec<f32>,
    pub backend_id: String,
}

impl EmbeddingVector {
    pub fn dimensions(&self) -> usize {
        self.values.len()
    }
}

/// A non-noise group of embedded conversations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique within a run.
    pub cluster_id: u32,
    /// Non-empty, in input order.
    pub member_ids: Vec<String>,
    pub centroid: Vec<f32>,
    /// Mean pairwise cosine similarity among members.
    pub cohesion: f64,
    /// Cosine similarity to the nearest other centroid; absent with one cluster.
    pub separation: Option<f64>,
    /// Filled after synthesis; empty straight out of clustering.
    pub label: String,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }

    /// A copy of this cluster carrying `label`.
    pub fn labeled(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self.clone()
        }
    }
}

/// Reserved pseudo-cluster for items not confidently assigned anywhere.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoiseCluster {
    pub member_ids: Vec<String>,
}

impl NoiseCluster {
    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }
}

/// Structured finding synthesized for one non-noise cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub cluster_id: u32,
    pub theme: String,
    pub severity: Option<Severity>,
    pub representative_quotes: Vec<String>,
    pub suggested_action: Option<String>,
    /// Why the theme matters.
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// Size of the source cluster.
    pub support_count: usize,
    /// Produced from the fallback path after parsing kept failing.
    pub degraded: bool,
}

impl Insight {
    /// Fallback insight carrying only a theme and support count.
    pub fn degraded(cluster_id: u32, theme: impl Into<String>, support_count: usize) -> Self {
        Self {
            cluster_id,
            theme: theme.into(),
            severity: None,
            representative_quotes: Vec::new(),
            suggested_action: None,
            rationale: None,
            open_questions: Vec::new(),
            support_count,
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_priority_order() {
        assert_eq!(Category::Question.priority(), 0);
        assert!(Category::Suggestion.priority() < Category::Complaint.priority());
        assert!(Category::Complaint.priority() < Category::Praise.priority());
        assert_eq!(Category::Statement.priority(), 9);
    }

    #[test]
    fn test_priority_covers_every_category() {
        for c in Category::ALL {
            assert!(Category::PRIORITY.contains(&c), "{c} missing");
        }
    }

    #[test]
    fn test_category_parse_round_trip() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
        assert!("unknown".parse::<Category>().is_err());
        assert_eq!(" Praise ".parse::<Category>().unwrap(), Category::Praise);
    }

    #[test]
    fn test_category_serde_snake_case() {
        let json = serde_json::to_string(&Category::Disagreement).unwrap();
        assert_eq!(json, "\"disagreement\"");
    }

    #[test]
    fn test_severity_ordering_and_parse() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("critical".parse::<Severity>().is_err());
    }

    #[test]
    fn test_record_word_count() {
        let r = ConversationRecord::new("a", "  one two\tthree\nfour ", 1);
        assert_eq!(r.word_count(), 4);
    }

    #[test]
    fn test_record_deserialize_optional_fields() {
        let json = r#"{"id":"r1","text":"hi there","timestamp":"2024-01-01T00:00:00Z"}"#;
        let r: ConversationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.upvotes, 0);
        assert!(r.community.is_none());
        assert!(r.parent_id.is_none());
    }

    #[test]
    fn test_span_consistency() {
        let conv = NormalizedConversation {
            id: "x".into(),
            clean_text: "Why is it slow? It is.".into(),
            spans: vec![Span {
                kind: SpanKind::Question,
                text: "Why is it slow?".into(),
                start: 0,
                end: 15,
            }],
            language: "en".into(),
            community: None,
            upvotes: 0,
            timestamp: Utc::now(),
            is_reply: false,
        };
        assert!(conv.spans_are_consistent());

        let mut broken = conv.clone();
        broken.spans[0].end = 99;
        assert!(!broken.spans_are_consistent());
    }

    #[test]
    fn test_degraded_insight_shape() {
        let insight = Insight::degraded(3, "Complaint: slow sync", 12);
        assert!(insight.degraded);
        assert!(insight.severity.is_none());
        assert!(insight.suggested_action.is_none());
        assert_eq!(insight.support_count, 12);
    }

    #[test]
    fn test_cluster_labeled_copies() {
        let c = Cluster {
            cluster_id: 0,
            member_ids: vec!["a".into(), "b".into()],
            centroid: vec![1.0, 0.0],
            cohesion: 0.9,
            separation: None,
            label: String::new(),
        };
        let l = c.labeled("Sync pain");
        assert_eq!(l.label, "Sync pain");
        assert!(c.label.is_empty());
        assert_eq!(l.size(), 2);
    }
}
