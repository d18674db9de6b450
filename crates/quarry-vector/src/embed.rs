//! Batched embedding of classified conversations.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use quarry_backend::EmbeddingBackend;
use quarry_core::config::{EmbeddingConfig, EmbeddingInput};
use quarry_core::{
    CancellationToken, ClassifiedConversation, EmbeddingVector, Exclusion, ItemFailure,
    QuarryError, RetryPolicy,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::VectorStore;

/// Text sent to the backend for one conversation.
///
/// `SpansOnly` falls back to the cleaned text when no spans were extracted.
pub fn embedding_text(item: &ClassifiedConversation, input: EmbeddingInput) -> String {
    let conv = &item.conversation;
    match input {
        EmbeddingInput::CleanTextAndLabel => format!("{}\n{}", conv.clean_text, item.label),
        EmbeddingInput::SpansOnly if !conv.spans.is_empty() => conv
            .spans
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        EmbeddingInput::SpansOnly => conv.clean_text.clone(),
    }
}

/// Vectors for every item that embedded cleanly, in input order.
#[derive(Debug, Clone, Default)]
pub struct EmbedOutcome {
    pub vectors: Vec<EmbeddingVector>,
    pub exclusions: Vec<Exclusion>,
}

impl EmbedOutcome {
    /// Load the vectors into a fresh run-scoped store.
    ///
    /// Vectors the store rejects are moved to `exclusions`.
    pub fn into_store(self, run_id: Uuid) -> (VectorStore, Vec<EmbeddingVector>, Vec<Exclusion>) {
        let mut store = VectorStore::new(run_id);
        let mut kept = Vec::with_capacity(self.vectors.len());
        let mut exclusions = self.exclusions;
        for vector in self.vectors {
            match store.insert(vector.clone()) {
                Ok(()) => kept.push(vector),
                Err(QuarryError::DataIntegrity { id, reason }) => {
                    warn!(item_id = %id, %reason, "vector excluded");
                    exclusions.push(Exclusion::new(id, reason));
                }
                Err(other) => {
                    exclusions.push(Exclusion::new(vector.owner_id, other.to_string()));
                }
            }
        }
        (store, kept, exclusions)
    }
}

/// An embedding run that stopped early.
///
/// `completed` holds the vectors of every batch that finished before the
/// failing one.
#[derive(Debug)]
pub struct EmbedFailure {
    pub failure: ItemFailure,
    pub completed: EmbedOutcome,
}

/// Splits items into batches and embeds them with bounded concurrency.
pub struct BatchEmbedder {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    max_concurrent_batches: usize,
    input: EmbeddingInput,
    retry: RetryPolicy,
}

impl BatchEmbedder {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        config: &EmbeddingConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            batch_size: config.batch_size.max(1),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            input: config.input,
            retry,
        }
    }

    pub fn backend_id(&self) -> &str {
        self.backend.id()
    }

    /// Embed every item, one vector per item, in input order.
    ///
    /// Cancellation is checked before each batch starts. A batch that
    /// exhausts its retries ends the run with the id of its first item.
    pub async fn embed_all(
        &self,
        items: &[ClassifiedConversation],
        cancel: &CancellationToken,
    ) -> std::result::Result<EmbedOutcome, EmbedFailure> {
        let batches: Vec<&[ClassifiedConversation]> = items.chunks(self.batch_size).collect();
        info!(
            backend = self.backend.id(),
            items = items.len(),
            batches = batches.len(),
            "embedding conversations"
        );

        let mut results = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| self.embed_batch(index, batch, cancel))
            .buffered(self.max_concurrent_batches);

        let mut outcome = EmbedOutcome::default();
        while let Some(result) = results.next().await {
            match result {
                Ok(batch) => {
                    outcome.vectors.extend(batch.vectors);
                    outcome.exclusions.extend(batch.exclusions);
                }
                Err(failure) => {
                    warn!(item_id = %failure.item_id, error = %failure.source, "embedding stopped");
                    return Err(EmbedFailure {
                        failure,
                        completed: outcome,
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn embed_batch(
        &self,
        index: usize,
        batch: &[ClassifiedConversation],
        cancel: &CancellationToken,
    ) -> std::result::Result<EmbedOutcome, ItemFailure> {
        let first_id = batch.first().map(|c| c.id().to_string()).unwrap_or_default();
        cancel
            .check()
            .map_err(|e| ItemFailure::new(first_id.clone(), e))?;

        let texts: Vec<String> = batch.iter().map(|c| embedding_text(c, self.input)).collect();
        let raw = self
            .retry
            .retry_transient("embed batch", || self.backend.embed(&texts))
            .await
            .map_err(|e| ItemFailure::new(first_id.clone(), e))?;

        if raw.len() != batch.len() {
            return Err(ItemFailure::new(
                first_id,
                QuarryError::Backend(format!(
                    "backend returned {} vectors for {} texts",
                    raw.len(),
                    batch.len()
                )),
            ));
        }

        let expected = self.backend.dimensions();
        let mut outcome = EmbedOutcome::default();
        for (item, values) in batch.iter().zip(raw) {
            if values.len() != expected {
                outcome.exclusions.push(Exclusion::new(
                    item.id(),
                    format!("dimension mismatch: expected {expected}, got {}", values.len()),
                ));
                continue;
            }
            outcome.vectors.push(EmbeddingVector {
                owner_id: item.id().to_string(),
                values,
                backend_id: self.backend.id().to_string(),
            });
        }
        debug!(batch = index, size = batch.len(), "batch embedded");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use quarry_backend::HashEmbedding;
    use quarry_core::{Category, NormalizedConversation, Result, Sentiment, Span, SpanKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn item(id: &str, text: &str) -> ClassifiedConversation {
        ClassifiedConversation {
            conversation: NormalizedConversation {
                id: id.to_string(),
                clean_text: text.to_string(),
                spans: vec![],
                language: "en".into(),
                community: None,
                upvotes: 10,
                timestamp: Utc::now(),
                is_reply: false,
            },
            category: Category::Statement,
            subcategory: None,
            label: "Statement: test".into(),
            sentiment: Sentiment::Neutral,
        }
    }

    fn items(n: usize) -> Vec<ClassifiedConversation> {
        (0..n)
            .map(|i| {
                item(
                    &format!("c{i}"),
                    &format!("conversation number {i} about topic {}", i % 3),
                )
            })
            .collect()
    }

    fn config(batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            backend: "hash".into(),
            batch_size,
            max_concurrent_batches: 3,
            input: EmbeddingInput::CleanTextAndLabel,
        }
    }

    /// Fails transiently a fixed number of times, then delegates to hashing.
    struct Flaky {
        inner: HashEmbedding,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(QuarryError::TransientBackend("503".into()));
            }
            self.inner.embed(texts).await
        }
    }

    /// Returns short vectors for texts containing "short".
    struct Ragged;

    #[async_trait]
    impl EmbeddingBackend for Ragged {
        fn id(&self) -> &str {
            "ragged"
        }
        fn dimensions(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("short") { vec![1.0] } else { vec![1.0, 0.0, 0.0] })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_one_vector_per_item_in_order() {
        let embedder = BatchEmbedder::new(
            Arc::new(HashEmbedding::new(32)),
            &config(4),
            RetryPolicy::immediate(0),
        );
        let input = items(10);
        let outcome = embedder.embed_all(&input, &CancellationToken::new()).await.unwrap();
        let ids: Vec<&str> = outcome.vectors.iter().map(|v| v.owner_id.as_str()).collect();
        let expected: Vec<&str> = input.iter().map(|c| c.id()).collect();
        assert_eq!(ids, expected);
        assert!(outcome.vectors.iter().all(|v| v.backend_id == "hash" && v.dimensions() == 32));
        assert!(outcome.exclusions.is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_does_not_change_vectors() {
        let backend: Arc<dyn EmbeddingBackend> = Arc::new(HashEmbedding::new(64));
        let input = items(9);
        let cancel = CancellationToken::new();
        let single = BatchEmbedder::new(backend.clone(), &config(1), RetryPolicy::immediate(0))
            .embed_all(&input, &cancel)
            .await
            .unwrap();
        let whole = BatchEmbedder::new(backend, &config(9), RetryPolicy::immediate(0))
            .embed_all(&input, &cancel)
            .await
            .unwrap();
        assert_eq!(single.vectors, whole.vectors);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let backend = Arc::new(Flaky {
            inner: HashEmbedding::new(16),
            failures_left: AtomicUsize::new(2),
        });
        let embedder = BatchEmbedder::new(backend, &config(50), RetryPolicy::immediate(3));
        let outcome = embedder.embed_all(&items(5), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.vectors.len(), 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_batch_item() {
        let backend = Arc::new(Flaky {
            inner: HashEmbedding::new(16),
            failures_left: AtomicUsize::new(100),
        });
        let embedder = BatchEmbedder::new(backend, &config(50), RetryPolicy::immediate(2));
        let err = embedder.embed_all(&items(5), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.failure.item_id, "c0");
        assert!(err.failure.source.is_transient());
        assert!(err.completed.vectors.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let embedder = BatchEmbedder::new(
            Arc::new(HashEmbedding::new(8)),
            &config(2),
            RetryPolicy::immediate(0),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = embedder.embed_all(&items(4), &cancel).await.unwrap_err();
        assert!(matches!(err.failure.source, QuarryError::Cancelled));
        assert_eq!(err.failure.item_id, "c0");
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_excluded() {
        let embedder = BatchEmbedder::new(Arc::new(Ragged), &config(8), RetryPolicy::immediate(0));
        let input = vec![
            item("a", "long enough"),
            item("b", "short one"),
            item("c", "long again"),
        ];
        let outcome = embedder.embed_all(&input, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.vectors.len(), 2);
        assert_eq!(
            outcome.exclusions,
            vec![Exclusion::new("b", "dimension mismatch: expected 3, got 1")]
        );
    }

    #[tokio::test]
    async fn test_into_store_moves_rejects_to_exclusions() {
        let outcome = EmbedOutcome {
            vectors: vec![
                EmbeddingVector {
                    owner_id: "a".into(),
                    values: vec![1.0, 0.0],
                    backend_id: "x".into(),
                },
                EmbeddingVector {
                    owner_id: "a".into(),
                    values: vec![0.0, 1.0],
                    backend_id: "x".into(),
                },
            ],
            exclusions: vec![],
        };
        let (store, kept, exclusions) = outcome.into_store(Uuid::new_v4());
        assert_eq!(store.len(), 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(exclusions.len(), 1);
        assert_eq!(exclusions[0].item_id, "a");
    }

    #[test]
    fn test_embedding_text_modes() {
        let mut c = item("a", "Sync fails. Any fix?");
        c.conversation.spans = vec![Span {
            kind: SpanKind::Question,
            text: "Any fix?".into(),
            start: 12,
            end: 20,
        }];
        assert_eq!(
            embedding_text(&c, EmbeddingInput::CleanTextAndLabel),
            "Sync fails. Any fix?\nStatement: test"
        );
        assert_eq!(embedding_text(&c, EmbeddingInput::SpansOnly), "Any fix?");
        c.conversation.spans.clear();
        assert_eq!(embedding_text(&c, EmbeddingInput::SpansOnly), "Sync fails. Any fix?");
    }
}
