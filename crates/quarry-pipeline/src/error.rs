//! Error types for pipeline runs.

use std::fmt;

use quarry_core::{EmbeddingVector, Insight, ItemFailure, QuarryError};
use quarry_insight::{ClassifyOutcome, ClusteringOutcome, NormalizeOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Classify,
    Embed,
    Cluster,
    Synthesize,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Normalize,
        Stage::Classify,
        Stage::Embed,
        Stage::Cluster,
        Stage::Synthesize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Classify => "classify",
            Stage::Embed => "embed",
            Stage::Cluster => "cluster",
            Stage::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run finished before it stopped.
#[derive(Debug, Clone, Default)]
pub struct PartialRun {
    pub run_id: Uuid,
    pub normalized: Option<NormalizeOutcome>,
    pub classified: Option<ClassifyOutcome>,
    /// Vectors embedded so far, in input order.
    pub embeddings: Vec<EmbeddingVector>,
    pub clustering: Option<ClusteringOutcome>,
    /// Insights finished before the failing cluster.
    pub insights: Vec<Insight>,
}

/// Errors that end a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Raised before any stage runs.
    #[error("{0}")]
    Config(QuarryError),
    #[error("Stage {stage} failed on item {item_id}: {source}")]
    StageFailure {
        stage: Stage,
        item_id: String,
        #[source]
        source: QuarryError,
        partial: Box<PartialRun>,
    },
    #[error("Run cancelled during {stage}")]
    Cancelled { stage: Stage, partial: Box<PartialRun> },
}

impl PipelineError {
    /// Attribute an item failure to `stage`. Cancellation keeps its own
    /// variant.
    pub(crate) fn from_item(stage: Stage, failure: ItemFailure, partial: PartialRun) -> Self {
        match failure.source {
            QuarryError::Cancelled => PipelineError::Cancelled {
                stage,
                partial: Box::new(partial),
            },
            source => PipelineError::StageFailure {
                stage,
                item_id: failure.item_id,
                source,
                partial: Box::new(partial),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Config(_) => None,
            PipelineError::StageFailure { stage, .. } | PipelineError::Cancelled { stage, .. } => {
                Some(*stage)
            }
        }
    }

    pub fn partial(&self) -> Option<&PartialRun> {
        match self {
            PipelineError::Config(_) => None,
            PipelineError::StageFailure { partial, .. }
            | PipelineError::Cancelled { partial, .. } => Some(partial.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_display() {
        let err = PipelineError::from_item(
            Stage::Embed,
            ItemFailure::new("c17", QuarryError::TransientBackend("timeout".into())),
            PartialRun::default(),
        );
        assert_eq!(
            err.to_string(),
            "Stage embed failed on item c17: Transient backend error: timeout"
        );
        assert_eq!(err.stage(), Some(Stage::Embed));
        assert!(err.partial().is_some());
    }

    #[test]
    fn test_cancellation_keeps_its_variant() {
        let err = PipelineError::from_item(
            Stage::Synthesize,
            ItemFailure::new("3", QuarryError::Cancelled),
            PartialRun::default(),
        );
        assert!(matches!(
            err,
            PipelineError::Cancelled {
                stage: Stage::Synthesize,
                ..
            }
        ));
    }

    #[test]
    fn test_config_error_has_no_stage() {
        let err = PipelineError::Config(QuarryError::Config("unknown backend".into()));
        assert_eq!(err.stage(), None);
        assert!(err.partial().is_none());
        assert_eq!(err.to_string(), "Configuration error: unknown backend");
    }
}
