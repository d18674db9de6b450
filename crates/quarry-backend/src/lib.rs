//! Capability contracts for embedding and synthesis providers, the built-in
//! providers, and the registry that resolves a configured id to one of them.

pub mod embedding;
pub mod extractive;
pub mod http;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod synthesis;

pub use embedding::{EmbeddingBackend, HashEmbedding};
pub use extractive::ExtractiveSynthesis;
pub use ollama::{OllamaEmbedding, OllamaSynthesis};
pub use openai::{OpenAiEmbedding, OpenAiSynthesis};
pub use registry::BackendRegistry;
pub use synthesis::SynthesisBackend;
