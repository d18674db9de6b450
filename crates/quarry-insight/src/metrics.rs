//! Read-only cluster quality metrics.

use std::collections::HashMap;

use quarry_core::EmbeddingVector;
use quarry_vector::cosine_similarity;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusteringOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterQuality {
    pub cluster_id: u32,
    pub size: usize,
    pub cohesion: f64,
    pub separation: Option<f64>,
}

/// Run-level quality of a clustering outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub per_cluster: Vec<ClusterQuality>,
    /// Mean silhouette over clustered items, cosine distance. Needs two
    /// clusters.
    pub silhouette: Option<f64>,
    pub mean_cohesion: Option<f64>,
    /// Mean similarity to the nearest other centroid. Lower is better.
    pub mean_separation: Option<f64>,
    /// Silhouette when defined, else mean cohesion.
    pub quality_score: Option<f64>,
    pub noise_fraction: f64,
    pub cluster_count: usize,
    pub noise_count: usize,
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

impl QualityReport {
    pub fn compute(outcome: &ClusteringOutcome, vectors: &[EmbeddingVector]) -> Self {
        let per_cluster: Vec<ClusterQuality> = outcome
            .clusters
            .iter()
            .map(|c| ClusterQuality {
                cluster_id: c.cluster_id,
                size: c.size(),
                cohesion: c.cohesion,
                separation: c.separation,
            })
            .collect();

        let clustered: usize = per_cluster.iter().map(|c| c.size).sum();
        let noise_count = outcome.noise.len();
        let total = clustered + noise_count;

        let silhouette = silhouette(outcome, vectors);
        let mean_cohesion = mean(per_cluster.iter().map(|c| c.cohesion));
        let mean_separation = mean(per_cluster.iter().filter_map(|c| c.separation));

        Self {
            cluster_count: per_cluster.len(),
            noise_count,
            noise_fraction: if total == 0 {
                0.0
            } else {
                noise_count as f64 / total as f64
            },
            quality_score: silhouette.or(mean_cohesion),
            silhouette,
            mean_cohesion,
            mean_separation,
            per_cluster,
        }
    }
}

fn distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// `s(i) = (b - a) / max(a, b)` with `a` the mean distance to the item's own
/// cluster and `b` the mean distance to the nearest other cluster.
/// Singleton members score 0.
fn silhouette(outcome: &ClusteringOutcome, vectors: &[EmbeddingVector]) -> Option<f64> {
    if outcome.clusters.len() < 2 {
        return None;
    }
    let by_id: HashMap<&str, &[f32]> = vectors
        .iter()
        .map(|v| (v.owner_id.as_str(), v.values.as_slice()))
        .collect();
    let groups: Vec<Vec<&[f32]>> = outcome
        .clusters
        .iter()
        .map(|c| {
            c.member_ids
                .iter()
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect()
        })
        .collect();

    let mut scores = Vec::new();
    for (g, group) in groups.iter().enumerate() {
        for (i, item) in group.iter().enumerate() {
            if group.len() < 2 {
                scores.push(0.0);
                continue;
            }
            let a = group
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| distance(item, other))
                .sum::<f64>()
                / (group.len() - 1) as f64;
            let b = groups
                .iter()
                .enumerate()
                .filter(|(h, other)| *h != g && !other.is_empty())
                .filter_map(|(_, other)| mean(other.iter().map(|o| distance(item, o))))
                .reduce(f64::min);
            let Some(b) = b else {
                continue;
            };
            let denom = a.max(b);
            scores.push(if denom > 0.0 { (b - a) / denom } else { 0.0 });
        }
    }
    mean(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusteringEngine;
    use quarry_core::config::ClusteringConfig;

    fn vector(id: &str, values: Vec<f32>) -> EmbeddingVector {
        EmbeddingVector {
            owner_id: id.into(),
            values,
            backend_id: "test".into(),
        }
    }

    fn separated() -> Vec<EmbeddingVector> {
        vec![
            vector("a1", vec![1.0, 0.0, 0.0]),
            vector("a2", vec![1.0, 0.1, 0.0]),
            vector("a3", vec![1.0, 0.0, 0.1]),
            vector("b1", vec![0.0, 1.0, 0.0]),
            vector("b2", vec![0.1, 1.0, 0.0]),
            vector("b3", vec![0.0, 1.0, 0.1]),
        ]
    }

    #[test]
    fn test_well_separated_silhouette_near_one() {
        let vectors = separated();
        let outcome = ClusteringEngine::new(ClusteringConfig::default()).cluster(&vectors);
        let report = QualityReport::compute(&outcome, &vectors);
        assert_eq!(report.cluster_count, 2);
        let s = report.silhouette.unwrap();
        assert!(s > 0.9, "silhouette {s}");
        assert_eq!(report.quality_score, report.silhouette);
        assert_eq!(report.noise_fraction, 0.0);
        assert_eq!(report.per_cluster.len(), 2);
        assert!(report.mean_separation.unwrap() < 0.2);
    }

    #[test]
    fn test_single_cluster_falls_back_to_cohesion() {
        let vectors: Vec<EmbeddingVector> = separated().into_iter().take(3).collect();
        let outcome = ClusteringEngine::new(ClusteringConfig::default()).cluster(&vectors);
        let report = QualityReport::compute(&outcome, &vectors);
        assert_eq!(report.cluster_count, 1);
        assert_eq!(report.silhouette, None);
        assert_eq!(report.quality_score, report.mean_cohesion);
        assert_eq!(report.mean_separation, None);
    }

    #[test]
    fn test_all_noise_report() {
        let vectors = vec![
            vector("x", vec![1.0, 0.0, 0.0]),
            vector("y", vec![0.0, 1.0, 0.0]),
        ];
        let outcome = ClusteringEngine::new(ClusteringConfig::default()).cluster(&vectors);
        let report = QualityReport::compute(&outcome, &vectors);
        assert_eq!(report.cluster_count, 0);
        assert_eq!(report.noise_count, 2);
        assert_eq!(report.noise_fraction, 1.0);
        assert_eq!(report.quality_score, None);
    }

    #[test]
    fn test_metrics_do_not_change_outcome() {
        let vectors = separated();
        let outcome = ClusteringEngine::new(ClusteringConfig::default()).cluster(&vectors);
        let before = outcome.clone();
        let _ = QualityReport::compute(&outcome, &vectors);
        assert_eq!(outcome, before);
    }
}
