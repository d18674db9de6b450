//! Pipeline orchestrator.
//!
//! Sequences normalize, classify, embed, cluster and synthesize for one run,
//! classifies failures by stage, and aggregates the per-stage counts into the
//! run summary. Each run owns its vector store and cluster set.

use std::sync::Arc;

use quarry_backend::BackendRegistry;
use quarry_core::{
    CancellationToken, Cluster, ConversationRecord, EmbeddingVector, Exclusion, Insight,
    ItemFailure, NormalizedConversation, PipelineConfig, QuarryError, RetryPolicy,
};
use quarry_insight::{
    ClassifyOutcome, ClusteringEngine, ClusteringOutcome, ConversationClassifier, FilterReport,
    InsightSynthesizer, KeywordClassifier, LanguageDetector, NormalizeOutcome, Normalizer,
    QualityReport,
};
use quarry_vector::{BatchEmbedder, VectorStore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{PartialRun, PipelineError, Stage};
use crate::summary::{RunReport, RunSummary, StageCount};

/// Every output of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub normalized: Vec<NormalizedConversation>,
    pub filter_report: FilterReport,
    pub classified: ClassifyOutcome,
    /// Vectors accepted by the store, in input order.
    pub embeddings: Vec<EmbeddingVector>,
    /// Items excluded during embedding.
    pub exclusions: Vec<Exclusion>,
    pub store: VectorStore,
    pub clustering: ClusteringOutcome,
    /// Clusters labeled with their insight's theme.
    pub clusters: Vec<Cluster>,
    pub quality: QualityReport,
    pub insights: Vec<Insight>,
    pub summary: RunSummary,
}

impl PipelineRun {
    pub fn report(&self) -> RunReport {
        RunReport {
            summary: self.summary.clone(),
            insights: self.insights.clone(),
            clusters: self.clusters.clone(),
            quality: self.quality.clone(),
        }
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            summary: self.summary,
            insights: self.insights,
            clusters: self.clusters,
            quality: self.quality,
        }
    }
}

/// One configured pipeline. Runs share nothing mutable, so a `Pipeline` can
/// drive several runs concurrently.
pub struct Pipeline {
    config: PipelineConfig,
    normalizer: Normalizer,
    classifier: Arc<dyn ConversationClassifier>,
    embedder: BatchEmbedder,
    engine: ClusteringEngine,
    synthesizer: InsightSynthesizer,
}

impl Pipeline {
    /// Validate `config` and resolve both backends.
    ///
    /// Fails with [`PipelineError::Config`] before any stage runs.
    pub fn from_config(
        config: PipelineConfig,
        registry: &BackendRegistry,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        let embedding = registry
            .resolve_embedding(&config.embedding.backend, &config.backends)
            .map_err(PipelineError::Config)?;
        let synthesis = registry
            .resolve_synthesis(&config.synthesis.backend, &config.backends)
            .map_err(PipelineError::Config)?;
        info!(
            embedding = embedding.id(),
            synthesis = synthesis.id(),
            "pipeline backends resolved"
        );

        let retry = RetryPolicy::from_config(&config.retry);
        Ok(Self {
            normalizer: Normalizer::new(config.filter.clone(), config.spans.clone()),
            classifier: Arc::new(KeywordClassifier::new(config.classify.clone())),
            embedder: BatchEmbedder::new(embedding, &config.embedding, retry.clone()),
            engine: ClusteringEngine::new(config.clustering.clone()),
            synthesizer: InsightSynthesizer::new(synthesis, config.synthesis.clone(), retry),
            config,
        })
    }

    /// Swap the classification strategy.
    pub fn with_classifier(mut self, classifier: Arc<dyn ConversationClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_language_detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.normalizer = Normalizer::with_detector(
            self.config.filter.clone(),
            self.config.spans.clone(),
            detector,
        );
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over `records`.
    ///
    /// A failure carries the stage, the item in progress and every output
    /// completed before it.
    pub async fn run(
        &self,
        records: &[ConversationRecord],
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, records = records.len(), "pipeline run started");

        // Normalize
        checkpoint(Stage::Normalize, cancel, || PartialRun {
            run_id,
            ..PartialRun::default()
        })?;
        let normalized = self.normalizer.normalize(records);
        self.check_integrity(
            Stage::Normalize,
            records.len(),
            &normalized.report.exclusions,
            || PartialRun {
                run_id,
                normalized: Some(normalized.clone()),
                ..PartialRun::default()
            },
        )?;

        // Classify
        let partial_after_normalize = || PartialRun {
            run_id,
            normalized: Some(normalized.clone()),
            ..PartialRun::default()
        };
        checkpoint(Stage::Classify, cancel, partial_after_normalize)?;
        let classified = self.classifier.classify_all(&normalized.conversations);

        // Embed
        let partial_after_classify = |embeddings: Vec<EmbeddingVector>| PartialRun {
            run_id,
            normalized: Some(normalized.clone()),
            classified: Some(classified.clone()),
            embeddings,
            ..PartialRun::default()
        };
        checkpoint(Stage::Embed, cancel, || partial_after_classify(Vec::new()))?;
        let embedded = match self.embedder.embed_all(&classified.conversations, cancel).await {
            Ok(outcome) => outcome,
            Err(failed) => {
                let partial = partial_after_classify(failed.completed.vectors);
                return Err(stage_failed(run_id, Stage::Embed, failed.failure, partial));
            }
        };
        let (store, embeddings, exclusions) = embedded.into_store(run_id);
        self.check_integrity(
            Stage::Embed,
            classified.conversations.len(),
            &exclusions,
            || partial_after_classify(embeddings.clone()),
        )?;
        info!(
            %run_id,
            stage = %Stage::Embed,
            kept = embeddings.len(),
            excluded = exclusions.len(),
            "stage complete"
        );

        // Cluster
        checkpoint(Stage::Cluster, cancel, || partial_after_classify(embeddings.clone()))?;
        let clustering = self.engine.cluster(&embeddings);
        let quality = QualityReport::compute(&clustering, &embeddings);
        if clustering.no_coherent_groups {
            warn!(%run_id, items = embeddings.len(), "no coherent groups found");
        }
        info!(
            %run_id,
            stage = %Stage::Cluster,
            clusters = clustering.clusters.len(),
            noise = clustering.noise.len(),
            quality = ?quality.quality_score,
            "stage complete"
        );

        // Synthesize
        let partial_after_cluster = |insights: Vec<Insight>| PartialRun {
            clustering: Some(clustering.clone()),
            insights,
            ..partial_after_classify(embeddings.clone())
        };
        checkpoint(Stage::Synthesize, cancel, || partial_after_cluster(Vec::new()))?;
        let synthesis = match self
            .synthesizer
            .synthesize_all(&clustering.clusters, &classified.conversations, &store, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(failed) => {
                let partial = partial_after_cluster(failed.completed);
                return Err(stage_failed(run_id, Stage::Synthesize, failed.failure, partial));
            }
        };

        let clusters: Vec<Cluster> = clustering
            .clusters
            .iter()
            .map(|cluster| {
                synthesis
                    .insights
                    .iter()
                    .find(|i| i.cluster_id == cluster.cluster_id)
                    .map_or_else(|| cluster.clone(), |i| cluster.labeled(i.theme.as_str()))
            })
            .collect();

        let clustered: usize = clustering.clusters.iter().map(Cluster::size).sum();
        let summary = RunSummary {
            run_id,
            stages: vec![
                StageCount::from_filter(&normalized.report),
                StageCount::new(
                    Stage::Classify,
                    normalized.conversations.len(),
                    classified.conversations.len(),
                ),
                StageCount::new(Stage::Embed, classified.conversations.len(), embeddings.len())
                    .with_reason("data_integrity", exclusions.len()),
                StageCount::new(Stage::Cluster, embeddings.len(), clustered)
                    .with_reason("noise", clustering.noise.len()),
                StageCount::new(
                    Stage::Synthesize,
                    clustering.clusters.len(),
                    synthesis.insights.len(),
                ),
            ],
            cluster_count: clustering.clusters.len(),
            noise_count: clustering.noise.len(),
            quality_score: quality.quality_score,
            silhouette: quality.silhouette,
            insight_count: synthesis.insights.len(),
            degraded_count: synthesis.degraded_count(),
            degraded_rate: synthesis.degraded_rate(),
            no_coherent_groups: clustering.no_coherent_groups,
        };
        info!(
            %run_id,
            clusters = summary.cluster_count,
            noise = summary.noise_count,
            insights = summary.insight_count,
            degraded = summary.degraded_count,
            "pipeline run complete"
        );

        let NormalizeOutcome {
            conversations,
            report,
        } = normalized;
        Ok(PipelineRun {
            run_id,
            normalized: conversations,
            filter_report: report,
            classified,
            embeddings,
            exclusions,
            store,
            clustering,
            clusters,
            quality,
            insights: synthesis.insights,
            summary,
        })
    }

    /// Escalate when a stage excluded more than the tolerated share of its
    /// input.
    fn check_integrity(
        &self,
        stage: Stage,
        input: usize,
        exclusions: &[Exclusion],
        partial: impl FnOnce() -> PartialRun,
    ) -> Result<(), PipelineError> {
        let Some(first) = exclusions.first() else {
            return Ok(());
        };
        let rate = exclusions.len() as f64 / input.max(1) as f64;
        let tolerance = self.config.filter.data_integrity_tolerance;
        if rate <= tolerance {
            warn!(
                stage = %stage,
                excluded = exclusions.len(),
                input,
                "items excluded within tolerance"
            );
            return Ok(());
        }

        error!(
            stage = %stage,
            excluded = exclusions.len(),
            input,
            tolerance,
            "exclusion rate above tolerance"
        );
        Err(PipelineError::StageFailure {
            stage,
            item_id: first.item_id.clone(),
            source: QuarryError::integrity(
                first.item_id.clone(),
                format!(
                    "{} of {} items excluded (tolerance {tolerance}), first: {}",
                    exclusions.len(),
                    input,
                    first.reason
                ),
            ),
            partial: Box::new(partial()),
        })
    }
}

/// `Err(Cancelled)` at the start of `stage` once the token has fired.
fn checkpoint(
    stage: Stage,
    cancel: &CancellationToken,
    partial: impl FnOnce() -> PartialRun,
) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        warn!(stage = %stage, "run cancelled");
        return Err(PipelineError::Cancelled {
            stage,
            partial: Box::new(partial()),
        });
    }
    Ok(())
}

fn stage_failed(
    run_id: Uuid,
    stage: Stage,
    failure: ItemFailure,
    partial: PartialRun,
) -> PipelineError {
    error!(
        %run_id,
        stage = %stage,
        item_id = %failure.item_id,
        error = %failure.source,
        "stage failed"
    );
    PipelineError::from_item(stage, failure, partial)
}
