//! Run-scoped vector store with brute-force cosine search.
//!
//! A store belongs to exactly one pipeline run. It is built fresh, owned by
//! that run's orchestration context, and only leaves it through an explicit
//! [`VectorStore::snapshot`].

use std::collections::HashMap;

use quarry_core::{EmbeddingVector, QuarryError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::similarity::cosine_similarity;

/// One hit returned from a nearest-neighbor query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub similarity: f64,
}

/// Pairwise cosine similarities over a subset of ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    pub ids: Vec<String>,
    /// `values[i][j]` is the similarity between `ids[i]` and `ids[j]`.
    pub values: Vec<Vec<f64>>,
}

impl SimilarityMatrix {
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }
}

/// Serializable copy of a store's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub run_id: Uuid,
    pub backend_id: Option<String>,
    pub dimensions: Option<usize>,
    pub vectors: Vec<EmbeddingVector>,
}

#[derive(Debug, Clone)]
pub struct VectorStore {
    run_id: Uuid,
    backend_id: Option<String>,
    dimensions: Option<usize>,
    /// Insertion order.
    entries: Vec<EmbeddingVector>,
    index: HashMap<String, usize>,
}

impl VectorStore {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            backend_id: None,
            dimensions: None,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn backend_id(&self) -> Option<&str> {
        self.backend_id.as_deref()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a vector.
    ///
    /// The first vector fixes the store's backend and dimensionality; every
    /// later vector must match both. Violations are data-integrity errors for
    /// that vector's owner and leave the store unchanged.
    pub fn insert(&mut self, vector: EmbeddingVector) -> Result<()> {
        let id = vector.owner_id.clone();
        if self.index.contains_key(&id) {
            return Err(QuarryError::integrity(id, "duplicate embedding owner"));
        }
        if vector.values.is_empty() {
            return Err(QuarryError::integrity(id, "empty embedding"));
        }
        if vector.values.iter().any(|v| !v.is_finite()) {
            return Err(QuarryError::integrity(id, "embedding has non-finite values"));
        }
        if let Some(expected) = self.dimensions {
            if vector.dimensions() != expected {
                return Err(QuarryError::integrity(
                    id,
                    format!(
                        "dimension mismatch: expected {expected}, got {}",
                        vector.dimensions()
                    ),
                ));
            }
        }
        if let Some(expected) = &self.backend_id {
            if &vector.backend_id != expected {
                return Err(QuarryError::integrity(
                    id,
                    format!(
                        "backend mismatch: expected {expected}, got {}",
                        vector.backend_id
                    ),
                ));
            }
        }

        self.dimensions.get_or_insert(vector.dimensions());
        self.backend_id.get_or_insert_with(|| vector.backend_id.clone());
        self.index.insert(id, self.entries.len());
        self.entries.push(vector);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&EmbeddingVector> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Vectors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EmbeddingVector> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.owner_id.as_str()).collect()
    }

    /// The `k` most similar stored vectors to `query`, best first.
    ///
    /// Equal similarities keep insertion order.
    pub fn nearest_neighbors(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        self.ranked(query, k, None)
    }

    /// Like [`nearest_neighbors`](Self::nearest_neighbors) for a stored item,
    /// excluding the item itself. `None` for an unknown id.
    pub fn neighbors_of(&self, id: &str, k: usize) -> Option<Vec<Neighbor>> {
        let entry = self.get(id)?;
        Some(self.ranked(&entry.values, k, Some(id)))
    }

    fn ranked(&self, query: &[f32], k: usize, exclude: Option<&str>) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = self
            .entries
            .iter()
            .filter(|e| Some(e.owner_id.as_str()) != exclude)
            .map(|e| Neighbor {
                id: e.owner_id.clone(),
                similarity: cosine_similarity(query, &e.values),
            })
            .collect();
        // Stable sort keeps insertion order among ties.
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        hits
    }

    /// Pairwise similarity over `ids`, in the given order.
    ///
    /// Unknown ids are a data-integrity error.
    pub fn similarity_matrix<S: AsRef<str>>(&self, ids: &[S]) -> Result<SimilarityMatrix> {
        let vectors = ids
            .iter()
            .map(|id| {
                self.get(id.as_ref())
                    .map(|e| e.values.as_slice())
                    .ok_or_else(|| QuarryError::integrity(id.as_ref(), "not in vector store"))
            })
            .collect::<Result<Vec<_>>>()?;

        let n = vectors.len();
        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            values[i][i] = 1.0;
            for j in (i + 1)..n {
                let s = cosine_similarity(vectors[i], vectors[j]);
                values[i][j] = s;
                values[j][i] = s;
            }
        }
        Ok(SimilarityMatrix {
            ids: ids.iter().map(|s| s.as_ref().to_string()).collect(),
            values,
        })
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            run_id: self.run_id,
            backend_id: self.backend_id.clone(),
            dimensions: self.dimensions,
            vectors: self.entries.clone(),
        }
    }

    /// Rebuild a store from a snapshot, re-checking every vector.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let mut store = Self::new(snapshot.run_id);
        for vector in snapshot.vectors {
            store.insert(vector)?;
        }
        Ok(store)
    }
}
