//! Run-level summary and the egress report.

use std::collections::BTreeMap;

use quarry_core::{Cluster, Insight};
use quarry_insight::{FilterReport, QualityReport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Stage;

/// Kept/dropped counts for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCount {
    pub stage: Stage,
    pub input: usize,
    pub kept: usize,
    pub dropped: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub drop_reasons: BTreeMap<String, usize>,
}

impl StageCount {
    pub fn new(stage: Stage, input: usize, kept: usize) -> Self {
        Self {
            stage,
            input,
            kept,
            dropped: input.saturating_sub(kept),
            drop_reasons: BTreeMap::new(),
        }
    }

    /// Record `count` drops under `reason`. Zero counts are skipped.
    pub fn with_reason(mut self, reason: impl Into<String>, count: usize) -> Self {
        if count > 0 {
            *self.drop_reasons.entry(reason.into()).or_insert(0) += count;
        }
        self
    }

    pub fn from_filter(report: &FilterReport) -> Self {
        report.dropped.iter().fold(
            Self::new(Stage::Normalize, report.input, report.kept),
            |count, (reason, n)| count.with_reason(reason.as_str(), *n),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// One entry per stage, in execution order.
    pub stages: Vec<StageCount>,
    pub cluster_count: usize,
    pub noise_count: usize,
    pub quality_score: Option<f64>,
    pub silhouette: Option<f64>,
    pub insight_count: usize,
    pub degraded_count: usize,
    pub degraded_rate: f64,
    pub no_coherent_groups: bool,
}

impl RunSummary {
    pub fn stage(&self, stage: Stage) -> Option<&StageCount> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Items dropped across every stage, noise included.
    pub fn total_dropped(&self) -> usize {
        self.stages.iter().map(|s| s.dropped).sum()
    }
}

/// Everything handed to reporting once a run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub insights: Vec<Insight>,
    /// Labeled clusters, ids matching `Insight::cluster_id`.
    pub clusters: Vec<Cluster>,
    pub quality: QualityReport,
}
