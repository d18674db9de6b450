//! Spherical k-means over cosine similarity, with a noise pseudo-cluster.
//!
//! The run is deterministic for a given input order and `random_seed`:
//! the only randomness is k-means++ seeding, drawn from a seeded `StdRng`.

use std::collections::HashMap;

use quarry_core::config::ClusteringConfig;
use quarry_core::{Cluster, EmbeddingVector, NoiseCluster};
use quarry_vector::cosine_similarity;
use quarry_vector::similarity::{mean_direction, normalized};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Result of one clustering pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOutcome {
    /// Ordered by id; ids follow each cluster's first member in input order.
    pub clusters: Vec<Cluster>,
    pub noise: NoiseCluster,
    pub iterations: usize,
    /// Centroid movement dropped below epsilon before the iteration cap.
    pub converged: bool,
    /// Every item ended up as noise.
    pub no_coherent_groups: bool,
}

impl ClusteringOutcome {
    /// Cluster id holding `id`, `None` for noise or unknown ids.
    pub fn cluster_of(&self, id: &str) -> Option<u32> {
        self.clusters
            .iter()
            .find(|c| c.member_ids.iter().any(|m| m == id))
            .map(|c| c.cluster_id)
    }

    /// Member id to cluster id, noise excluded.
    pub fn assignments(&self) -> HashMap<&str, u32> {
        self.clusters
            .iter()
            .flat_map(|c| c.member_ids.iter().map(move |m| (m.as_str(), c.cluster_id)))
            .collect()
    }

    pub fn get(&self, cluster_id: u32) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusteringEngine {
    config: ClusteringConfig,
}

impl ClusteringEngine {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    pub fn cluster(&self, vectors: &[EmbeddingVector]) -> ClusteringOutcome {
        let cfg = &self.config;
        let threshold = cfg.noise_threshold;
        let units: Vec<Vec<f32>> = vectors.iter().map(|v| normalized(&v.values)).collect();
        let n = units.len();

        // Items with no neighbor above the threshold never seed or join a group.
        let candidates: Vec<usize> = (0..n)
            .filter(|&i| {
                (0..n).any(|j| j != i && cosine_similarity(&units[i], &units[j]) >= threshold)
            })
            .collect();
        debug!(
            items = n,
            candidates = candidates.len(),
            "outlier pre-pass complete"
        );

        let mut centroids = match cfg.target_cluster_count {
            Some(k) => self.seed_kmeans_pp(&units, &candidates, k),
            None => self.seed_leaders(&units, &candidates),
        };

        let mut assignment: Vec<Option<usize>> = vec![None; n];
        let mut iterations = 0;
        let mut converged = centroids.is_empty();
        while !converged && iterations < cfg.max_iterations {
            iterations += 1;
            self.assign(&units, &candidates, &centroids, &mut assignment);
            let updated = recompute(&units, &assignment, &centroids);
            let movement = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| 1.0 - cosine_similarity(old, new))
                .fold(0.0_f64, f64::max);
            centroids = updated;
            if movement < cfg.epsilon {
                converged = true;
            }
        }
        self.assign(&units, &candidates, &centroids, &mut assignment);
        self.dissolve_small(&units, &centroids, &mut assignment);

        let outcome = self.build(vectors, &units, &assignment, centroids.len());
        let outcome = ClusteringOutcome {
            iterations,
            converged,
            ..outcome
        };
        info!(
            clusters = outcome.clusters.len(),
            noise = outcome.noise.len(),
            iterations,
            converged,
            "clustering complete"
        );
        outcome
    }

    /// k-means++ over the candidates: first seed uniform, the rest weighted
    /// by squared cosine distance to the nearest chosen seed.
    fn seed_kmeans_pp(&self, units: &[Vec<f32>], candidates: &[usize], k: usize) -> Vec<Vec<f32>> {
        let k = k.min(candidates.len());
        if k == 0 {
            return Vec::new();
        }
        let mut rng = StdRng::seed_from_u64(self.config.random_seed);
        let mut chosen = vec![candidates[rng.random_range(0..candidates.len())]];

        while chosen.len() < k {
            let weights: Vec<f64> = candidates
                .iter()
                .map(|&i| {
                    let nearest = chosen
                        .iter()
                        .map(|&c| cosine_similarity(&units[i], &units[c]))
                        .fold(f64::MIN, f64::max);
                    (1.0 - nearest).max(0.0).powi(2)
                })
                .collect();
            let total: f64 = weights.iter().sum();
            if total <= f64::EPSILON {
                // Remaining candidates coincide with chosen seeds.
                break;
            }

            let mut target = rng.random::<f64>() * total;
            let mut pick = None;
            for (&i, &w) in candidates.iter().zip(&weights) {
                if w > 0.0 {
                    pick = Some(i);
                    if target < w {
                        break;
                    }
                    target -= w;
                }
            }
            match pick {
                Some(i) => chosen.push(i),
                None => break,
            }
        }
        chosen.iter().map(|&i| units[i].clone()).collect()
    }

    /// Density seeding: walk candidates in input order and open a new seed
    /// whenever no existing seed lies within the noise threshold.
    fn seed_leaders(&self, units: &[Vec<f32>], candidates: &[usize]) -> Vec<Vec<f32>> {
        let mut leaders: Vec<usize> = Vec::new();
        for &i in candidates {
            let covered = leaders
                .iter()
                .any(|&l| cosine_similarity(&units[i], &units[l]) >= self.config.noise_threshold);
            if !covered {
                leaders.push(i);
            }
        }
        leaders.iter().map(|&i| units[i].clone()).collect()
    }

    /// Nearest centroid per candidate; ties go to the lower index, and
    /// anything below the noise threshold to every centroid is unassigned.
    fn assign(
        &self,
        units: &[Vec<f32>],
        candidates: &[usize],
        centroids: &[Vec<f32>],
        assignment: &mut [Option<usize>],
    ) {
        for &i in candidates {
            assignment[i] = best_centroid(&units[i], centroids, |_| true)
                .filter(|&(_, s)| s >= self.config.noise_threshold)
                .map(|(c, _)| c);
        }
    }

    /// Clusters under `min_cluster_size` release their members to the best
    /// surviving centroid within the threshold, else to noise.
    fn dissolve_small(
        &self,
        units: &[Vec<f32>],
        centroids: &[Vec<f32>],
        assignment: &mut [Option<usize>],
    ) {
        let mut sizes = vec![0usize; centroids.len()];
        for c in assignment.iter().flatten() {
            sizes[*c] += 1;
        }
        let alive: Vec<bool> = sizes
            .iter()
            .map(|&s| s >= self.config.min_cluster_size)
            .collect();
        for (i, slot) in assignment.iter_mut().enumerate() {
            if let Some(c) = *slot {
                if !alive[c] {
                    *slot = best_centroid(&units[i], centroids, |c| alive[c])
                        .filter(|&(_, s)| s >= self.config.noise_threshold)
                        .map(|(c, _)| c);
                }
            }
        }
    }

    fn build(
        &self,
        vectors: &[EmbeddingVector],
        units: &[Vec<f32>],
        assignment: &[Option<usize>],
        k: usize,
    ) -> ClusteringOutcome {
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
        let mut noise = NoiseCluster::default();
        for (i, slot) in assignment.iter().enumerate() {
            match slot {
                Some(c) => members[*c].push(i),
                None => noise.member_ids.push(vectors[i].owner_id.clone()),
            }
        }

        // Input order is preserved inside each member list, so sorting on the
        // first member orders clusters by first appearance.
        let mut groups: Vec<Vec<usize>> = members.into_iter().filter(|m| !m.is_empty()).collect();
        groups.sort_by_key(|m| m[0]);

        let centroids: Vec<Vec<f32>> = groups
            .iter()
            .map(|m| mean_direction(m.iter().map(|&i| units[i].as_slice())).unwrap_or_default())
            .collect();

        let clusters: Vec<Cluster> = groups
            .iter()
            .enumerate()
            .map(|(idx, m)| Cluster {
                cluster_id: idx as u32,
                member_ids: m.iter().map(|&i| vectors[i].owner_id.clone()).collect(),
                centroid: centroids[idx].clone(),
                cohesion: cohesion(units, m),
                separation: separation(&centroids, idx),
                label: String::new(),
            })
            .collect();

        ClusteringOutcome {
            no_coherent_groups: clusters.is_empty(),
            clusters,
            noise,
            iterations: 0,
            converged: false,
        }
    }
}

/// Index and similarity of the most similar eligible centroid.
fn best_centroid(
    unit: &[f32],
    centroids: &[Vec<f32>],
    eligible: impl Fn(usize) -> bool,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (c, centroid) in centroids.iter().enumerate() {
        if !eligible(c) {
            continue;
        }
        let s = cosine_similarity(unit, centroid);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((c, s));
        }
    }
    best
}

/// Mean direction of each centroid's members; empty clusters keep their
/// previous centroid.
fn recompute(
    units: &[Vec<f32>],
    assignment: &[Option<usize>],
    centroids: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    (0..centroids.len())
        .map(|c| {
            let members = assignment
                .iter()
                .enumerate()
                .filter(|(_, slot)| **slot == Some(c))
                .map(|(i, _)| units[i].as_slice());
            mean_direction(members).unwrap_or_else(|| centroids[c].clone())
        })
        .collect()
}

/// Mean pairwise similarity among members; 1.0 for a singleton.
fn cohesion(units: &[Vec<f32>], members: &[usize]) -> f64 {
    if members.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (a, &i) in members.iter().enumerate() {
        for &j in &members[a + 1..] {
            total += cosine_similarity(&units[i], &units[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Cosine similarity to the nearest other centroid. Lower is better.
fn separation(centroids: &[Vec<f32>], idx: usize) -> Option<f64> {
    centroids
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != idx)
        .map(|(_, other)| cosine_similarity(&centroids[idx], other))
        .reduce(f64::max)
}
