//! Backend registry.
//!
//! Maps a configured backend id to a factory that builds the implementation
//! from [`BackendsConfig`]. Resolution of an unknown id fails with a
//! configuration error; there is no fallback backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use quarry_core::config::BackendsConfig;
use quarry_core::{QuarryError, Result};
use tracing::debug;

use crate::embedding::{EmbeddingBackend, HashEmbedding};
use crate::extractive::ExtractiveSynthesis;
use crate::ollama::{OllamaEmbedding, OllamaSynthesis};
use crate::openai::{OpenAiEmbedding, OpenAiSynthesis};
use crate::synthesis::SynthesisBackend;

pub type EmbeddingFactory =
    Arc<dyn Fn(&BackendsConfig) -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync>;
pub type SynthesisFactory =
    Arc<dyn Fn(&BackendsConfig) -> Result<Arc<dyn SynthesisBackend>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct BackendRegistry {
    embedding: BTreeMap<String, EmbeddingFactory>,
    synthesis: BTreeMap<String, SynthesisFactory>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("embedding", &self.embedding_ids())
            .field("synthesis", &self.synthesis_ids())
            .finish()
    }
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `ollama`, `openai` and `hash` embedding backends and
    /// `ollama`, `openai` and `extractive` synthesis backends.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_embedding(OllamaEmbedding::ID, |c| {
            Ok(Arc::new(OllamaEmbedding::new(&c.ollama)?) as Arc<dyn EmbeddingBackend>)
        });
        registry.register_embedding(OpenAiEmbedding::ID, |c| {
            Ok(Arc::new(OpenAiEmbedding::new(&c.openai)?) as Arc<dyn EmbeddingBackend>)
        });
        registry.register_embedding(HashEmbedding::ID, |c| {
            Ok(Arc::new(HashEmbedding::new(c.hash.dimensions)) as Arc<dyn EmbeddingBackend>)
        });
        registry.register_synthesis(OllamaSynthesis::ID, |c| {
            Ok(Arc::new(OllamaSynthesis::new(&c.ollama)?) as Arc<dyn SynthesisBackend>)
        });
        registry.register_synthesis(OpenAiSynthesis::ID, |c| {
            Ok(Arc::new(OpenAiSynthesis::new(&c.openai)?) as Arc<dyn SynthesisBackend>)
        });
        registry.register_synthesis(ExtractiveSynthesis::ID, |_| {
            Ok(Arc::new(ExtractiveSynthesis::new()) as Arc<dyn SynthesisBackend>)
        });
        registry
    }

    /// Register an embedding factory. A later registration under the same id
    /// replaces the earlier one.
    pub fn register_embedding<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&BackendsConfig) -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync + 'static,
    {
        self.embedding.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn register_synthesis<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&BackendsConfig) -> Result<Arc<dyn SynthesisBackend>> + Send + Sync + 'static,
    {
        self.synthesis.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn embedding_ids(&self) -> Vec<&str> {
        self.embedding.keys().map(String::as_str).collect()
    }

    pub fn synthesis_ids(&self) -> Vec<&str> {
        self.synthesis.keys().map(String::as_str).collect()
    }

    pub fn resolve_embedding(
        &self,
        id: &str,
        config: &BackendsConfig,
    ) -> Result<Arc<dyn EmbeddingBackend>> {
        let factory = self.embedding.get(id).ok_or_else(|| {
            unknown("embedding", id, &self.embedding_ids())
        })?;
        debug!(backend = id, "resolving embedding backend");
        factory(config)
    }

    pub fn resolve_synthesis(
        &self,
        id: &str,
        config: &BackendsConfig,
    ) -> Result<Arc<dyn SynthesisBackend>> {
        let factory = self.synthesis.get(id).ok_or_else(|| {
            unknown("synthesis", id, &self.synthesis_ids())
        })?;
        debug!(backend = id, "resolving synthesis backend");
        factory(config)
    }
}

fn unknown(kind: &str, id: &str, known: &[&str]) -> QuarryError {
    QuarryError::Config(format!(
        "unknown {kind} backend '{id}' (known: {})",
        known.join(", ")
    ))
}
