//! Whole-pipeline scenarios over synthetic conversations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quarry_backend::{BackendRegistry, EmbeddingBackend, SynthesisBackend};
use quarry_core::{CancellationToken, ConversationRecord, PipelineConfig, QuarryError, Result};
use quarry_pipeline::{Pipeline, PipelineError, RunReport, Stage};
use serde_json::Value;

// =============================================================================
// Test backends
// =============================================================================

/// Puts "sync" conversations on axis 0 and "billing" ones on axis 1, with a
/// small length-dependent wobble so members are not identical.
struct TopicEmbedding;

const TOPIC_DIMS: usize = 8;

fn topic_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v = vec![0.0; TOPIC_DIMS];
    if lower.contains("sync") {
        v[0] = 1.0;
    } else if lower.contains("billing") {
        v[1] = 1.0;
    } else {
        v[TOPIC_DIMS - 1] = 1.0;
    }
    v[2 + text.len() % 5] += (1 + text.len() % 3) as f32 * 0.02;
    v
}

#[async_trait]
impl EmbeddingBackend for TopicEmbedding {
    fn id(&self) -> &str {
        "topic"
    }

    fn dimensions(&self) -> usize {
        TOPIC_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

/// Drops half the dimensions for billing conversations.
struct RaggedEmbedding;

#[async_trait]
impl EmbeddingBackend for RaggedEmbedding {
    fn id(&self) -> &str {
        "ragged"
    }

    fn dimensions(&self) -> usize {
        TOPIC_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = topic_vector(t);
                if t.to_lowercase().contains("billing") {
                    v.truncate(TOPIC_DIMS / 2);
                }
                v
            })
            .collect())
    }
}

/// Always unreachable.
struct DownEmbedding {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EmbeddingBackend for DownEmbedding {
    fn id(&self) -> &str {
        "down"
    }

    fn dimensions(&self) -> usize {
        TOPIC_DIMS
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(QuarryError::TransientBackend("connection refused".into()))
    }
}

/// Replies with text that never parses.
struct GarbledSynthesis;

#[async_trait]
impl SynthesisBackend for GarbledSynthesis {
    fn id(&self) -> &str {
        "garbled"
    }

    async fn synthesize(&self, _prompt: &str, _context: &Value) -> Result<String> {
        Ok("Sure! Here is what I found: lots of people are unhappy.".into())
    }
}

/// Answers the first cluster properly, then fires the cancellation token.
struct CancelAfterFirst {
    token: CancellationToken,
}

#[async_trait]
impl SynthesisBackend for CancelAfterFirst {
    fn id(&self) -> &str {
        "cancel-after-first"
    }

    async fn synthesize(&self, _prompt: &str, _context: &Value) -> Result<String> {
        self.token.cancel();
        Ok(r#"{"theme": "Sync failures", "severity": "high", "suggested_action": "Fix sync"}"#.into())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// 50 records: 20 sync, 20 billing, 5 low-engagement and 5 too short.
fn records() -> Vec<ConversationRecord> {
    let mut records = Vec::new();
    for i in 0..20 {
        records.push(ConversationRecord::new(
            format!("sync-{i}"),
            format!(
                "The sync between my phone and laptop failed again today, ticket {i} for our team."
            ),
            10 + i,
        ));
        records.push(ConversationRecord::new(
            format!("billing-{i}"),
            format!(
                "The billing page charged my card twice this month and {i} invoices are still wrong."
            ),
            10 + i,
        ));
    }
    for i in 0..5 {
        records.push(ConversationRecord::new(
            format!("quiet-{i}"),
            "Does anyone else see the sync stall for a few minutes after waking the laptop?",
            1,
        ));
    }
    for i in 0..5 {
        records.push(ConversationRecord::new(
            format!("short-{i}"),
            "Sync is broken again.",
            12,
        ));
    }
    records
}

fn config(embedding: &str, synthesis: &str) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.embedding.backend = embedding.into();
    config.synthesis.backend = synthesis.into();
    config.clustering.random_seed = 7;
    config.retry.max_retries = 2;
    config.retry.initial_backoff_ms = 0;
    config.retry.max_backoff_ms = 0;
    config
}

fn registry() -> BackendRegistry {
    let mut registry = BackendRegistry::with_builtins();
    registry
        .register_embedding("topic", |_| Ok(Arc::new(TopicEmbedding) as Arc<dyn EmbeddingBackend>))
        .register_embedding("ragged", |_| {
            Ok(Arc::new(RaggedEmbedding) as Arc<dyn EmbeddingBackend>)
        })
        .register_synthesis("garbled", |_| {
            Ok(Arc::new(GarbledSynthesis) as Arc<dyn SynthesisBackend>)
        });
    registry
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_two_separated_groups_give_two_insights() {
    let pipeline = Pipeline::from_config(config("topic", "extractive"), &registry()).unwrap();
    let run = pipeline
        .run(&records(), &CancellationToken::new())
        .await
        .unwrap();

    let normalize = run.summary.stage(Stage::Normalize).unwrap();
    assert_eq!(normalize.input, 50);
    assert_eq!(normalize.kept, 40);
    assert_eq!(normalize.drop_reasons.get("low_engagement"), Some(&5));
    assert_eq!(normalize.drop_reasons.get("too_short"), Some(&5));

    assert_eq!(run.summary.cluster_count, 2);
    assert_eq!(run.summary.noise_count, 0);
    assert!(!run.summary.no_coherent_groups);
    assert_eq!(run.insights.len(), 2);
    let support: Vec<usize> = run.insights.iter().map(|i| i.support_count).collect();
    assert_eq!(support, vec![20, 20]);
    assert_eq!(run.summary.degraded_count, 0);
    assert!(run.summary.quality_score.unwrap() > 0.9);

    assert!(run.clusters[0].member_ids.iter().all(|id| id.starts_with("sync-")));
    assert!(run.clusters[1].member_ids.iter().all(|id| id.starts_with("billing-")));
    for (cluster, insight) in run.clusters.iter().zip(&run.insights) {
        assert_eq!(cluster.cluster_id, insight.cluster_id);
        assert_eq!(cluster.label, insight.theme);
        assert!(!insight.representative_quotes.is_empty());
    }
    assert_eq!(run.store.len(), 40);
}

#[tokio::test]
async fn test_every_item_lands_in_exactly_one_group() {
    let pipeline = Pipeline::from_config(config("topic", "extractive"), &registry()).unwrap();
    let run = pipeline
        .run(&records(), &CancellationToken::new())
        .await
        .unwrap();

    let mut seen: Vec<&str> = run
        .clustering
        .clusters
        .iter()
        .flat_map(|c| c.member_ids.iter().map(String::as_str))
        .chain(run.clustering.noise.member_ids.iter().map(String::as_str))
        .collect();
    let total = seen.len();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), total);
    assert_eq!(total, run.embeddings.len());
}

#[tokio::test]
async fn test_repeated_runs_assign_identically() {
    let pipeline = Pipeline::from_config(config("hash", "extractive"), &registry()).unwrap();
    let cancel = CancellationToken::new();
    let first = pipeline.run(&records(), &cancel).await.unwrap();
    let second = pipeline.run(&records(), &cancel).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    let ids = |run: &quarry_pipeline::PipelineRun| -> Vec<Vec<String>> {
        run.clustering
            .clusters
            .iter()
            .map(|c| c.member_ids.clone())
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(first.clustering.noise, second.clustering.noise);
}

#[tokio::test]
async fn test_garbled_synthesis_degrades_every_insight() {
    let pipeline = Pipeline::from_config(config("topic", "garbled"), &registry()).unwrap();
    let run = pipeline
        .run(&records(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.insights.len(), 2);
    assert_eq!(run.summary.degraded_count, 2);
    assert_eq!(run.summary.degraded_rate, 1.0);
    for insight in &run.insights {
        assert!(insight.degraded);
        assert!(!insight.theme.is_empty());
        assert!(insight.suggested_action.is_none());
        assert_eq!(insight.support_count, 20);
    }
}

#[tokio::test]
async fn test_unknown_synthesis_backend_fails_before_running() {
    let err = Pipeline::from_config(config("topic", "nope"), &registry())
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(err.stage().is_none());
}

#[tokio::test]
async fn test_unreachable_embedding_backend_is_stage_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = registry();
    let seen = Arc::clone(&calls);
    registry.register_embedding("down", move |_| {
        Ok(Arc::new(DownEmbedding {
            calls: Arc::clone(&seen),
        }) as Arc<dyn EmbeddingBackend>)
    });

    let mut config = config("down", "extractive");
    config.embedding.max_concurrent_batches = 1;
    let pipeline = Pipeline::from_config(config, &registry).unwrap();
    let err = pipeline
        .run(&records(), &CancellationToken::new())
        .await
        .err()
        .unwrap();

    match err {
        PipelineError::StageFailure {
            stage,
            item_id,
            source,
            partial,
        } => {
            assert_eq!(stage, Stage::Embed);
            assert_eq!(item_id, "sync-0");
            assert!(source.is_transient());
            assert_eq!(partial.classified.unwrap().conversations.len(), 40);
            assert!(partial.embeddings.is_empty());
            assert!(partial.clustering.is_none());
        }
        other => panic!("unexpected error: {other}"),
    }
    // One attempt plus two retries for the first batch.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dimension_mismatches_above_tolerance_fail_embedding() {
    let pipeline = Pipeline::from_config(config("ragged", "extractive"), &registry()).unwrap();
    let err = pipeline
        .run(&records(), &CancellationToken::new())
        .await
        .err()
        .unwrap();

    match err {
        PipelineError::StageFailure {
            stage,
            item_id,
            source,
            partial,
        } => {
            assert_eq!(stage, Stage::Embed);
            assert_eq!(item_id, "billing-0");
            assert!(matches!(source, QuarryError::DataIntegrity { .. }));
            assert_eq!(partial.embeddings.len(), 20);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_cancellation_during_synthesis_keeps_partial_results() {
    let token = CancellationToken::new();
    let mut registry = registry();
    let fired = token.clone();
    registry.register_synthesis("cancel-after-first", move |_| {
        Ok(Arc::new(CancelAfterFirst {
            token: fired.clone(),
        }) as Arc<dyn SynthesisBackend>)
    });

    let mut config = config("topic", "cancel-after-first");
    config.synthesis.max_concurrent = 1;
    let pipeline = Pipeline::from_config(config, &registry).unwrap();
    let err = pipeline.run(&records(), &token).await.err().unwrap();

    match err {
        PipelineError::Cancelled { stage, partial } => {
            assert_eq!(stage, Stage::Synthesize);
            assert_eq!(partial.insights.len(), 1);
            assert_eq!(partial.insights[0].theme, "Sync failures");
            assert_eq!(partial.clustering.unwrap().clusters.len(), 2);
            assert_eq!(partial.embeddings.len(), 40);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_report_serializes_for_egress() {
    let pipeline = Pipeline::from_config(config("topic", "extractive"), &registry()).unwrap();
    let run = pipeline
        .run(&records(), &CancellationToken::new())
        .await
        .unwrap();

    let json = serde_json::to_value(run.report()).unwrap();
    assert_eq!(json["summary"]["cluster_count"], 2);
    assert_eq!(json["summary"]["stages"].as_array().unwrap().len(), 5);
    assert_eq!(json["insights"][0]["support_count"], 20);

    let parsed: RunReport = serde_json::from_value(json).unwrap();
    assert_eq!(parsed.summary.run_id, run.run_id);
    assert_eq!(parsed.insights.len(), 2);
}
