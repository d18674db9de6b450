//! Deterministic keyword classifier.
//!
//! Scores each category's signal set over the cleaned text and spans, picks
//! the strongest (ties by [`Category::PRIORITY`]), and falls back to
//! `Statement`. No network dependency.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use quarry_core::config::ClassifyConfig;
use quarry_core::{Category, ClassifiedConversation, NormalizedConversation, Sentiment, SpanKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::label::generate_label;

/// Assigns category, subcategory, label and sentiment to one conversation.
pub trait ConversationClassifier: Send + Sync {
    fn classify(&self, conversation: &NormalizedConversation) -> ClassifiedConversation;

    /// Classify a batch, preserving input order.
    fn classify_all(&self, conversations: &[NormalizedConversation]) -> ClassifyOutcome {
        let classified: Vec<ClassifiedConversation> =
            conversations.iter().map(|c| self.classify(c)).collect();
        let mut category_counts = BTreeMap::new();
        for item in &classified {
            *category_counts.entry(item.category).or_insert(0) += 1;
        }
        info!(
            classified = classified.len(),
            categories = category_counts.len(),
            "classification complete"
        );
        ClassifyOutcome {
            conversations: classified,
            category_counts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyOutcome {
    pub conversations: Vec<ClassifiedConversation>,
    pub category_counts: BTreeMap<Category, usize>,
}

// =============================================================================
// Compiled signal sets (compiled once, reused across calls)
// =============================================================================

struct SignalPatterns {
    categories: Vec<(Category, Vec<Regex>)>,
    subcategories: Vec<(&'static str, Vec<Regex>)>,
}

fn mk(pats: &[&str]) -> Vec<Regex> {
    pats.iter()
        .map(|p| Regex::new(p).expect("Invalid signal regex"))
        .collect()
}

static SIGNALS: LazyLock<SignalPatterns> = LazyLock::new(|| SignalPatterns {
    categories: vec![
        (
            Category::Question,
            mk(&[
                r"\?",
                r"(?i)^\s*(?:how|what|why|when|where|who|which|can|could|does|is|are|should)\b",
                r"(?i)\banyone\s+know\b",
                r"(?i)\bany\s+(?:idea|ideas|tips|advice)\b",
            ]),
        ),
        (
            Category::Answer,
            mk(&[
                r"(?i)\btry\b",
                r"(?i)\byou\s+can\b",
                r"(?i)\bsolution\b",
                r"(?i)\bfix(?:ed)?\b",
                r"(?i)\bwork(?:ed|s)\s+for\s+me\b",
                r"(?i)\bsteps?\b",
                r"(?i)\bworkaround\b",
            ]),
        ),
        (
            Category::Suggestion,
            mk(&[
                r"(?i)\bshould\s+add\b",
                r"(?i)\bi\s+wish\b",
                r"(?i)\bplease\s+add\b",
                r"(?i)\bwould\s+be\s+(?:great|nice|awesome)\b",
                r"(?i)\bfeature\s+request\b",
                r"(?i)\bit\s+would\s+help\b",
            ]),
        ),
        (
            Category::Comparison,
            mk(&[
                r"(?i)\bvs\b",
                r"(?i)\bversus\b",
                r"(?i)\bcompared\s+to\b",
                r"(?i)\bbetter\s+than\b",
                r"(?i)\bworse\s+than\b",
                r"(?i)\balternatives?\b",
                r"(?i)\bswitched\s+(?:from|to)\b",
            ]),
        ),
        (
            Category::Complaint,
            mk(&[
                r"(?i)\bbugs?\b",
                r"(?i)\berrors?\b",
                r"(?i)\bissues?\b",
                r"(?i)\bbroken\b",
                r"(?i)\bcrash(?:es|ed|ing)?\b",
                r"(?i)\bslow\b",
                r"(?i)\bproblems?\b",
                r"(?i)\bfail(?:s|ed|ing|ure)?\b",
                r"(?i)\bannoying\b",
                r"(?i)\bfrustrat(?:ing|ed)\b",
                r"(?i)\bterrible\b",
                r"(?i)\bunusable\b",
            ]),
        ),
        (
            Category::Praise,
            mk(&[
                r"(?i)\blove\b",
                r"(?i)\bgreat\b",
                r"(?i)\bawesome\b",
                r"(?i)\bamazing\b",
                r"(?i)\bfantastic\b",
                r"(?i)\bthanks?\b|\bthank\s+you\b",
                r"(?i)\bhelpful\b",
            ]),
        ),
        (
            Category::Agreement,
            mk(&[
                r"(?i)\bagree\b",
                r"(?i)\bexactly\b",
                r"(?i)\bgood\s+point\b",
                r"(?i)^\s*(?:yes|yep|true|correct)\b",
                r"(?i)\bsame\s+here\b",
            ]),
        ),
        (
            Category::Disagreement,
            mk(&[
                r"(?i)\bdisagree\b",
                r"(?i)^\s*no\b",
                r"(?i)\bwrong\b",
                r"(?i)\bnot\s+true\b",
                r"(?i)\bbad\s+take\b",
                r"(?i)\bi\s+doubt\b",
            ]),
        ),
        (
            Category::Sharing,
            mk(&[
                r"(?i)\bi\s+(?:built|made|created|wrote)\b",
                r"(?i)\bsharing\b",
                r"(?i)\bhere(?:\s+is|'s)\b",
                r"(?i)\bcheck\s+(?:it|this)\s+out\b",
            ]),
        ),
    ],
    subcategories: vec![
        (
            "pricing",
            mk(&[
                r"(?i)\bpric(?:e|es|ing)\b",
                r"(?i)\b(?:expensive|costly)\b",
                r"(?i)\bbilling\b",
                r"(?i)\bsubscriptions?\b",
                r"(?i)\bcosts?\b",
                r"(?i)\bfees?\b",
                r"(?i)\bcheap(?:er)?\b",
            ]),
        ),
        (
            "performance",
            mk(&[
                r"(?i)\bslow(?:er)?\b",
                r"(?i)\blag(?:gy)?\b",
                r"(?i)\blatency\b",
                r"(?i)\bperformance\b",
                r"(?i)\btimeouts?\b",
                r"(?i)\bfast(?:er)?\b",
                r"(?i)\b(?:memory|cpu)\b",
            ]),
        ),
        (
            "usability",
            mk(&[
                r"(?i)\bconfusing\b",
                r"(?i)\bunclear\b",
                r"(?i)\b(?:un)?intuitive\b",
                r"(?i)\b(?:ui|ux)\b",
                r"(?i)\bhard\s+to\s+use\b",
                r"(?i)\bworkflow\b",
                r"(?i)\binterface\b",
            ]),
        ),
        (
            "support",
            mk(&[
                r"(?i)\bsupport\s+(?:team|staff|ticket)\b",
                r"(?i)\bcustomer\s+service\b",
                r"(?i)\bhelp\s*desk\b",
                r"(?i)\btickets?\b",
                r"(?i)\bresponse\s+time\b",
            ]),
        ),
        (
            "bug",
            mk(&[
                r"(?i)\bbugs?\b",
                r"(?i)\bcrash(?:es|ed|ing)?\b",
                r"(?i)\berrors?\b",
                r"(?i)\bbroken\b",
                r"(?i)\bexceptions?\b",
                r"(?i)\bglitch(?:es)?\b",
            ]),
        ),
        (
            "feature_request",
            mk(&[
                r"(?i)\bfeature\s+request\b",
                r"(?i)\bplease\s+add\b",
                r"(?i)\bi\s+wish\b",
                r"(?i)\bshould\s+add\b",
                r"(?i)\bmissing\b",
                r"(?i)\broadmap\b",
            ]),
        ),
        (
            "comparison",
            mk(&[
                r"(?i)\bvs\b",
                r"(?i)\bversus\b",
                r"(?i)\bcompared\s+to\b",
                r"(?i)\b(?:better|worse)\s+than\b",
                r"(?i)\balternatives?\b",
                r"(?i)\bswitched\b",
            ]),
        ),
        (
            "setup",
            mk(&[
                r"(?i)\binstall(?:ed|ing|ation)?\b",
                r"(?i)\bset\s*up\b",
                r"(?i)\bconfigur(?:e|ed|ation)\b",
                r"(?i)\bonboarding\b",
                r"(?i)\bgetting\s+started\b",
            ]),
        ),
        (
            "recommendation",
            mk(&[
                r"(?i)\brecommend(?:ed|ation|ations)?\b",
                r"(?i)\bsuggest(?:ed|ion)?\b",
                r"(?i)\bgo\s+with\b",
                r"(?i)\bbest\s+option\b",
                r"(?i)\bworth\s+it\b",
            ]),
        ),
    ],
});

fn hits(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().filter(|p| p.is_match(text)).count()
}

fn patterns_for(category: Category) -> &'static [Regex] {
    SIGNALS
        .categories
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, p)| p.as_slice())
        .unwrap_or(&[])
}

/// Keyword/signal scoring classifier.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    config: ClassifyConfig,
}

impl KeywordClassifier {
    pub fn new(config: ClassifyConfig) -> Self {
        Self { config }
    }

    /// Signal strength per category. Zero-score categories are omitted.
    pub fn scores(&self, conversation: &NormalizedConversation) -> Vec<(Category, usize)> {
        let text = &conversation.clean_text;
        let span_count =
            |kind: SpanKind| conversation.spans.iter().filter(|s| s.kind == kind).count();

        SIGNALS
            .categories
            .iter()
            .filter(|(category, _)| {
                conversation.is_reply
                    || !matches!(category, Category::Agreement | Category::Disagreement)
            })
            .map(|(category, patterns)| {
                let bonus = match category {
                    Category::Question => span_count(SpanKind::Question),
                    Category::Answer => span_count(SpanKind::Answer),
                    _ => 0,
                };
                (*category, hits(patterns, text) + bonus)
            })
            .filter(|(_, score)| *score > 0)
            .collect()
    }

    fn category(&self, conversation: &NormalizedConversation) -> Category {
        self.scores(conversation)
            .into_iter()
            .max_by(|(a, sa), (b, sb)| sa.cmp(sb).then(b.priority().cmp(&a.priority())))
            .map(|(category, _)| category)
            .unwrap_or(Category::Statement)
    }

    /// The strongest subcategory, only when its hit count exceeds the
    /// configured threshold. Ties go to the earlier subcategory.
    fn subcategory(&self, text: &str) -> Option<&'static str> {
        let mut best: Option<(&'static str, usize)> = None;
        for (name, patterns) in &SIGNALS.subcategories {
            let strength = hits(patterns, text);
            if strength > best.map_or(0, |(_, s)| s) {
                best = Some((*name, strength));
            }
        }
        best.filter(|(_, strength)| *strength > self.config.subcategory_threshold)
            .map(|(name, _)| name)
    }

    fn sentiment(&self, text: &str) -> Sentiment {
        let positive = hits(patterns_for(Category::Praise), text);
        let negative = hits(patterns_for(Category::Complaint), text);
        match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        }
    }
}

impl ConversationClassifier for KeywordClassifier {
    fn classify(&self, conversation: &NormalizedConversation) -> ClassifiedConversation {
        let category = self.category(conversation);
        let subcategory = self.subcategory(&conversation.clean_text);
        let label = generate_label(category, subcategory, conversation);
        ClassifiedConversation {
            conversation: conversation.clone(),
            category,
            subcategory: subcategory.map(str::to_string),
            label,
            sentiment: self.sentiment(&conversation.clean_text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spans::SpanExtractor;
    use chrono::Utc;

    fn conv(id: &str, text: &str, is_reply: bool) -> NormalizedConversation {
        NormalizedConversation {
            id: id.to_string(),
            clean_text: text.to_string(),
            spans: SpanExtractor::default().extract(text, is_reply),
            language: "en".into(),
            community: None,
            upvotes: 10,
            timestamp: Utc::now(),
            is_reply,
        }
    }

    fn classify(text: &str, is_reply: bool) -> ClassifiedConversation {
        KeywordClassifier::default().classify(&conv("x", text, is_reply))
    }

    #[test]
    fn test_question_wins_over_answer() {
        let c = classify("Why does sync hang? Try clearing the cache first.", false);
        assert_eq!(c.category, Category::Question);
    }

    #[test]
    fn test_complaint_and_negative_sentiment() {
        let c = classify(
            "The app keeps crashing and the sync is broken, this bug is so frustrating",
            false,
        );
        assert_eq!(c.category, Category::Complaint);
        assert_eq!(c.sentiment, Sentiment::Negative);
        assert_eq!(c.subcategory.as_deref(), Some("bug"));
    }

    #[test]
    fn test_tie_broken_by_priority() {
        // One suggestion signal, one complaint signal.
        let c = classify("It would be great if the export was not so slow", false);
        assert_eq!(c.category, Category::Suggestion);
    }

    #[test]
    fn test_no_signal_is_statement() {
        let c = classify("The team meets on the third floor near the elevators every week", false);
        assert_eq!(c.category, Category::Statement);
        assert_eq!(c.subcategory, None);
        assert_eq!(c.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn test_agreement_only_counts_for_replies() {
        let text = "Exactly, I agree with this completely and fully";
        assert_eq!(classify(text, true).category, Category::Agreement);
        assert_eq!(classify(text, false).category, Category::Statement);
    }

    #[test]
    fn test_subcategory_requires_strength_above_threshold() {
        let strong = classify(
            "The price is too expensive and the subscription billing is confusing",
            false,
        );
        assert_eq!(strong.subcategory.as_deref(), Some("pricing"));

        let weak = classify("The price went up again this month for our small team", false);
        assert_eq!(weak.subcategory, None);

        let strict = KeywordClassifier::new(ClassifyConfig {
            subcategory_threshold: 4,
        });
        let c = strict.classify(&conv(
            "x",
            "The price is too expensive and the subscription billing is confusing",
            false,
        ));
        assert_eq!(c.subcategory, None);
    }

    #[test]
    fn test_category_always_in_set() {
        let texts = [
            "",
            "???",
            "no",
            "I built a small tool for this, here is the repo",
            "Postgres vs MySQL, which is better than the other for analytics",
            "Thanks, this was super helpful and I love it",
        ];
        let classifier = KeywordClassifier::default();
        for (i, text) in texts.iter().enumerate() {
            let c = classifier.classify(&conv(&i.to_string(), text, i % 2 == 0));
            assert!(Category::ALL.contains(&c.category));
        }
    }

    #[test]
    fn test_classify_all_preserves_order_and_counts() {
        let items = vec![
            conv("a", "How do I export my data to CSV?", false),
            conv("b", "The export is broken and slow", false),
            conv("c", "How can I change the theme?", false),
        ];
        let out = KeywordClassifier::default().classify_all(&items);
        let ids: Vec<&str> = out.conversations.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(out.category_counts.get(&Category::Question), Some(&2));
        assert_eq!(out.category_counts.get(&Category::Complaint), Some(&1));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let text = "Switched from Jira to Linear because Jira is slow. Linear is great.";
        let first = classify(text, false);
        let second = classify(text, false);
        assert_eq!(first.category, second.category);
        assert_eq!(first.label, second.label);
        assert!(first.label.split_whitespace().count() <= 8);
    }
}
