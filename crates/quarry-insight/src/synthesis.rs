//! Cluster synthesis: one structured [`Insight`] per non-noise cluster.
//!
//! Each cluster's context goes to a [`SynthesisBackend`]. Replies must parse
//! as the JSON insight object; unparseable replies are retried with
//! [`REFORMAT_PROMPT`](crate::prompts::REFORMAT_PROMPT) and finally replaced
//! by a degraded insight. Transient backend errors are retried with backoff
//! and end the stage once exhausted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use quarry_backend::SynthesisBackend;
use quarry_core::config::SynthesisConfig;
use quarry_core::{
    CancellationToken, ClassifiedConversation, Cluster, Insight, ItemFailure, RetryPolicy,
    Sentiment, Severity,
};
use quarry_vector::VectorStore;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::prompts;

/// Longest quote excerpt, in characters.
const MAX_QUOTE_CHARS: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct SynthesisOutcome {
    /// One per input cluster, in input order.
    pub insights: Vec<Insight>,
}

impl SynthesisOutcome {
    pub fn degraded_count(&self) -> usize {
        self.insights.iter().filter(|i| i.degraded).count()
    }

    /// Share of degraded insights; 0 when there are none at all.
    pub fn degraded_rate(&self) -> f64 {
        if self.insights.is_empty() {
            0.0
        } else {
            self.degraded_count() as f64 / self.insights.len() as f64
        }
    }
}

/// Synthesis stopped at a cluster. `failure.item_id` is the cluster id.
#[derive(Debug)]
pub struct SynthesisFailure {
    pub failure: ItemFailure,
    /// Insights finished before the failing cluster.
    pub completed: Vec<Insight>,
}

/// Reply fields as the backend sends them.
#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    theme: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    suggested_action: String,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    open_questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedReply {
    theme: String,
    severity: Severity,
    suggested_action: String,
    rationale: Option<String>,
    open_questions: Vec<String>,
}

/// Strip a surrounding ```` ``` ```` / ```` ```json ```` fence if present.
fn strip_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_reply(reply: &str) -> Result<ParsedReply, String> {
    let raw: RawReply =
        serde_json::from_str(strip_fence(reply)).map_err(|e| format!("not a JSON object: {e}"))?;

    let theme = raw.theme.trim().to_string();
    if theme.is_empty() {
        return Err("missing theme".into());
    }
    let suggested_action = raw.suggested_action.trim().to_string();
    if suggested_action.is_empty() {
        return Err("missing suggested_action".into());
    }
    let severity: Severity = raw.severity.parse().map_err(|e| format!("{e}"))?;

    Ok(ParsedReply {
        theme,
        severity,
        suggested_action,
        rationale: raw
            .rationale
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
        open_questions: raw
            .open_questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(3)
            .collect(),
    })
}

/// Most frequent value; the first one seen wins ties.
fn most_common<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, n) in counts {
        if n > best.map_or(0, |(_, b)| b) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value)
}

fn excerpt(item: &ClassifiedConversation) -> String {
    let conv = &item.conversation;
    let text = conv
        .spans
        .first()
        .map(|s| s.text.as_str())
        .unwrap_or(&conv.clean_text);
    text.chars().take(MAX_QUOTE_CHARS).collect::<String>().trim().to_string()
}

pub struct InsightSynthesizer {
    backend: Arc<dyn SynthesisBackend>,
    config: SynthesisConfig,
    retry: RetryPolicy,
}

impl InsightSynthesizer {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        config: SynthesisConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            config,
            retry,
        }
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    /// Synthesize every cluster with at most `max_concurrent` calls in
    /// flight. Cancellation is checked before each cluster starts.
    pub async fn synthesize_all(
        &self,
        clusters: &[Cluster],
        conversations: &[ClassifiedConversation],
        store: &VectorStore,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome, SynthesisFailure> {
        let lookup: HashMap<&str, &ClassifiedConversation> =
            conversations.iter().map(|c| (c.id(), c)).collect();
        info!(
            backend = self.backend.id(),
            clusters = clusters.len(),
            max_concurrent = self.config.max_concurrent,
            "synthesizing insights"
        );

        let mut results = stream::iter(clusters)
            .map(|cluster| self.synthesize_cluster(cluster, &lookup, store, cancel))
            .buffered(self.config.max_concurrent.max(1));

        let mut insights = Vec::with_capacity(clusters.len());
        while let Some(result) = results.next().await {
            match result {
                Ok(insight) => insights.push(insight),
                Err(failure) => {
                    warn!(
                        cluster_id = %failure.item_id,
                        error = %failure.source,
                        "synthesis stopped"
                    );
                    return Err(SynthesisFailure {
                        failure,
                        completed: insights,
                    });
                }
            }
        }

        let outcome = SynthesisOutcome { insights };
        info!(
            insights = outcome.insights.len(),
            degraded = outcome.degraded_count(),
            "synthesis complete"
        );
        Ok(outcome)
    }

    async fn synthesize_cluster(
        &self,
        cluster: &Cluster,
        lookup: &HashMap<&str, &ClassifiedConversation>,
        store: &VectorStore,
        cancel: &CancellationToken,
    ) -> Result<Insight, ItemFailure> {
        let cluster_key = cluster.cluster_id.to_string();
        cancel
            .check()
            .map_err(|e| ItemFailure::new(cluster_key.clone(), e))?;

        let members: Vec<&ClassifiedConversation> = cluster
            .member_ids
            .iter()
            .filter_map(|id| lookup.get(id.as_str()).copied())
            .collect();
        let context = self.context(cluster, &members);

        for attempt in 0..=self.retry.max_retries {
            let prompt = prompts::for_attempt(attempt);
            let reply = self
                .retry
                .retry_transient("synthesize cluster", || self.backend.synthesize(prompt, &context))
                .await
                .map_err(|e| ItemFailure::new(cluster_key.clone(), e))?;

            match parse_reply(&reply) {
                Ok(parsed) => {
                    debug!(cluster_id = cluster.cluster_id, attempt, "insight parsed");
                    return Ok(Insight {
                        cluster_id: cluster.cluster_id,
                        theme: parsed.theme,
                        severity: Some(parsed.severity),
                        representative_quotes: self.quotes(cluster, &members, store),
                        suggested_action: Some(parsed.suggested_action),
                        rationale: parsed.rationale,
                        open_questions: parsed.open_questions,
                        support_count: cluster.size(),
                        degraded: false,
                    });
                }
                Err(reason) => {
                    warn!(
                        cluster_id = cluster.cluster_id,
                        attempt,
                        %reason,
                        "unparseable synthesis reply"
                    );
                }
            }
        }

        let theme = most_common(members.iter().map(|m| m.label.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Cluster {}", cluster.cluster_id));
        warn!(cluster_id = cluster.cluster_id, %theme, "falling back to degraded insight");
        Ok(Insight::degraded(cluster.cluster_id, theme, cluster.size()))
    }

    /// Structured context handed to the backend for one cluster.
    fn context(&self, cluster: &Cluster, members: &[&ClassifiedConversation]) -> Value {
        let mut category_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for m in members {
            *category_counts.entry(m.category.as_str()).or_insert(0) += 1;
        }
        let negative = members
            .iter()
            .filter(|m| m.sentiment == Sentiment::Negative)
            .count();
        let negative_share = if members.is_empty() {
            0.0
        } else {
            negative as f64 / members.len() as f64
        };

        let sample: Vec<Value> = members
            .iter()
            .take(self.config.max_context_members)
            .map(|m| {
                json!({
                    "id": m.id(),
                    "text": m.conversation.clean_text,
                    "label": m.label,
                    "category": m.category.as_str(),
                    "subcategory": m.subcategory,
                    "sentiment": m.sentiment,
                })
            })
            .collect();

        json!({
            "cluster_id": cluster.cluster_id,
            "size": cluster.size(),
            "cohesion": cluster.cohesion,
            "dominant_label": most_common(members.iter().map(|m| m.label.as_str())),
            "dominant_category": most_common(members.iter().map(|m| m.category.as_str())),
            "category_counts": category_counts,
            "negative_share": negative_share,
            "members": sample,
        })
    }

    /// Members closest to the centroid, one excerpt each, duplicates skipped.
    fn quotes(
        &self,
        cluster: &Cluster,
        members: &[&ClassifiedConversation],
        store: &VectorStore,
    ) -> Vec<String> {
        let by_id: HashMap<&str, &ClassifiedConversation> =
            members.iter().map(|m| (m.id(), *m)).collect();
        let mut seen = HashSet::new();
        store
            .nearest_neighbors(&cluster.centroid, store.len())
            .into_iter()
            .filter_map(|n| by_id.get(n.id.as_str()).copied())
            .map(excerpt)
            .filter(|q| !q.is_empty() && seen.insert(q.clone()))
            .take(self.config.max_quotes)
            .collect()
    }
}
