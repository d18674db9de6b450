//! Benchmarks for the clustering engine and quality metrics.
//!
//! Vectors come from the offline hash embedding over synthetic conversations
//! drawn from a handful of topics, so the groups are realistic rather than
//! perfectly separated.
//!
//! ```bash
//! cargo bench -p quarry-insight
//! ```

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use quarry_backend::HashEmbedding;
use quarry_core::config::ClusteringConfig;
use quarry_core::EmbeddingVector;
use quarry_insight::{ClusteringEngine, QualityReport};

const TOPICS: &[&str] = &[
    "sync between phone and laptop is slow and keeps failing overnight",
    "billing charged twice this month and the subscription price went up",
    "how do I export my reports to csv with custom columns",
    "the new dashboard layout is confusing and hard to navigate",
    "login with single sign on fails after the latest update",
];

/// Conversation text for item `index`: a topic sentence plus a unique tail.
fn conversation_text(index: usize) -> String {
    format!(
        "{} for our team of {} people, ticket {}",
        TOPICS[index % TOPICS.len()],
        3 + index % 17,
        index
    )
}

fn build_vectors(count: usize) -> Vec<EmbeddingVector> {
    let embedder = HashEmbedding::new(384);
    (0..count)
        .map(|i| EmbeddingVector {
            owner_id: format!("c{i}"),
            values: embedder.hash_to_vector(&conversation_text(i)),
            backend_id: HashEmbedding::ID.to_string(),
        })
        .collect()
}

fn bench_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustering");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    for count in [100usize, 500] {
        let vectors = build_vectors(count);

        let density = ClusteringEngine::new(ClusteringConfig::default());
        group.bench_with_input(BenchmarkId::new("density_seeding", count), &vectors, |b, v| {
            b.iter(|| density.cluster(v));
        });

        let kmeans = ClusteringEngine::new(ClusteringConfig {
            target_cluster_count: Some(TOPICS.len()),
            ..ClusteringConfig::default()
        });
        group.bench_with_input(BenchmarkId::new("kmeans_pp", count), &vectors, |b, v| {
            b.iter(|| kmeans.cluster(v));
        });
    }

    group.finish();
}

fn bench_quality_report(c: &mut Criterion) {
    let vectors = build_vectors(500);
    let outcome = ClusteringEngine::new(ClusteringConfig {
        target_cluster_count: Some(TOPICS.len()),
        ..ClusteringConfig::default()
    })
    .cluster(&vectors);

    c.bench_function("quality_report_500", |b| {
        b.iter(|| QualityReport::compute(&outcome, &vectors));
    });
}

criterion_group!(benches, bench_clustering, bench_quality_report);
criterion_main!(benches);
