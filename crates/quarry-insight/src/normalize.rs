//! Conversation normalizer and filter.
//!
//! Per record, in order: integrity checks, engagement and word-count
//! thresholds, target-language check, then text cleaning and span
//! extraction. Dropped records are counted by reason; the survivors keep
//! their input order.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};

use quarry_core::config::{FilterConfig, SpanConfig};
use quarry_core::{ConversationRecord, Exclusion, NormalizedConversation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::language::{HeuristicLanguageDetector, LanguageDetector};
use crate::spans::SpanExtractor;

// =============================================================================
// Cleaning patterns (compiled once, reused across calls)
// =============================================================================

struct CleanPatterns {
    fenced_code: Regex,
    inline_code: Regex,
    image: Regex,
    link: Regex,
    autolink: Regex,
    bare_url: Regex,
    heading: Regex,
    emphasis: Regex,
    whitespace: Regex,
}

static CLEAN_PATTERNS: LazyLock<CleanPatterns> = LazyLock::new(|| {
    let mk = |p: &str| Regex::new(p).expect("Invalid cleaning regex");
    CleanPatterns {
        fenced_code: mk(r"(?s)```.*?(```|$)|~~~.*?(~~~|$)"),
        inline_code: mk(r"`[^`\n]*`"),
        image: mk(r"!\[([^\]]*)\]\([^)]*\)"),
        link: mk(r"\[([^\]]*)\]\([^)]*\)"),
        autolink: mk(r"<(?:https?|ftp)://[^>\s]*>"),
        // No leading word boundary: URLs glued to a word still go.
        // Closing punctuation after the URL is left in place.
        bare_url: mk(r"(?i)(?:(?:https?|ftp)://|www\.)\S*[^\s)\].,]"),
        heading: mk(r"(?m)^\s{0,3}(?:#{1,6}|>+)\s*"),
        emphasis: mk(r"\*\*|__|~~"),
        whitespace: mk(r"\s+"),
    }
});

/// Strip code, markdown link syntax and URLs, then collapse whitespace.
///
/// Links keep their visible text. URLs are removed after links are
/// unwrapped so link text that is itself a URL does not survive.
pub fn clean_text(raw: &str) -> String {
    let p = &*CLEAN_PATTERNS;
    let text = p.fenced_code.replace_all(raw, " ");
    let text = p.inline_code.replace_all(&text, " ");
    let text = p.image.replace_all(&text, "$1");
    let text = p.link.replace_all(&text, "$1");
    let text = p.autolink.replace_all(&text, " ");
    let text = p.bare_url.replace_all(&text, " ");
    let text = p.heading.replace_all(&text, "");
    let text = p.emphasis.replace_all(&text, "");
    let text = p.whitespace.replace_all(&text, " ");
    text.trim().to_string()
}

/// Why a record did not make it past the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    LowEngagement,
    TooShort,
    WrongLanguage,
    Malformed,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::LowEngagement => "low_engagement",
            DropReason::TooShort => "too_short",
            DropReason::WrongLanguage => "wrong_language",
            DropReason::Malformed => "malformed",
        }
    }
}

/// Kept/dropped counts for one normalizer pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub input: usize,
    pub kept: usize,
    pub dropped: BTreeMap<DropReason, usize>,
    /// Malformed records, with the integrity problem found.
    pub exclusions: Vec<Exclusion>,
}

impl FilterReport {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    pub fn dropped_for(&self, reason: DropReason) -> usize {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    fn drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub conversations: Vec<NormalizedConversation>,
    pub report: FilterReport,
}

pub struct Normalizer {
    filter: FilterConfig,
    extractor: SpanExtractor,
    detector: Arc<dyn LanguageDetector>,
}

impl Normalizer {
    pub fn new(filter: FilterConfig, spans: SpanConfig) -> Self {
        Self::with_detector(filter, spans, Arc::new(HeuristicLanguageDetector::default()))
    }

    pub fn with_detector(
        filter: FilterConfig,
        spans: SpanConfig,
        detector: Arc<dyn LanguageDetector>,
    ) -> Self {
        Self {
            filter,
            extractor: SpanExtractor::new(spans),
            detector,
        }
    }

    pub fn normalize(&self, records: &[ConversationRecord]) -> NormalizeOutcome {
        let mut report = FilterReport {
            input: records.len(),
            ..FilterReport::default()
        };
        let mut conversations = Vec::with_capacity(records.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());

        for record in records {
            match self.check(record, &mut seen) {
                Ok(conversation) => conversations.push(conversation),
                Err(Rejection::Dropped(reason)) => {
                    debug!(item_id = %record.id, reason = reason.as_str(), "record dropped");
                    report.drop(reason);
                }
                Err(Rejection::Malformed(reason)) => {
                    warn!(item_id = %record.id, %reason, "malformed record excluded");
                    report.drop(DropReason::Malformed);
                    report.exclusions.push(Exclusion::new(record.id.clone(), reason));
                }
            }
        }

        report.kept = conversations.len();
        info!(
            input = report.input,
            kept = report.kept,
            dropped = report.dropped_total(),
            "normalization complete"
        );
        NormalizeOutcome {
            conversations,
            report,
        }
    }

    fn check<'a>(
        &self,
        record: &'a ConversationRecord,
        seen: &mut HashSet<&'a str>,
    ) -> Result<NormalizedConversation, Rejection> {
        if record.id.trim().is_empty() {
            return Err(Rejection::Malformed("empty id".into()));
        }
        if !seen.insert(record.id.as_str()) {
            return Err(Rejection::Malformed("duplicate id in batch".into()));
        }

        if record.upvotes < self.filter.min_engagement {
            return Err(Rejection::Dropped(DropReason::LowEngagement));
        }
        if record.word_count() < self.filter.min_word_count {
            return Err(Rejection::Dropped(DropReason::TooShort));
        }

        let clean = clean_text(&record.text);
        if clean.is_empty() {
            return Err(Rejection::Dropped(DropReason::TooShort));
        }
        let language = self
            .detector
            .detect(&clean)
            .filter(|lang| lang.eq_ignore_ascii_case(&self.filter.target_language))
            .ok_or(Rejection::Dropped(DropReason::WrongLanguage))?;

        let is_reply = record.parent_id.is_some();
        let spans = self.extractor.extract(&clean, is_reply);
        Ok(NormalizedConversation {
            id: record.id.clone(),
            clean_text: clean,
            spans,
            language,
            community: record.community.clone(),
            upvotes: record.upvotes,
            timestamp: record.timestamp,
            is_reply,
        })
    }
}

enum Rejection {
    Dropped(DropReason),
    Malformed(String),
}
