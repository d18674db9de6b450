use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{QuarryError, Result};

/// Top-level configuration for one pipeline run.
///
/// Passed explicitly into the orchestrator and threaded through to each stage.
/// Every section rejects unknown keys so a typo surfaces as a configuration
/// error instead of silently falling back to a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub general: GeneralConfig,
    pub filter: FilterConfig,
    pub spans: SpanConfig,
    pub classify: ClassifyConfig,
    pub embedding: EmbeddingConfig,
    pub clustering: ClusteringConfig,
    pub synthesis: SynthesisConfig,
    pub retry: RetryConfig,
    pub backends: BackendsConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed, or carries an
    /// unrecognized key.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject option values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        let f = &self.filter;
        if f.target_language.trim().is_empty() {
            return Err(invalid("filter.target_language", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&f.data_integrity_tolerance) {
            return Err(invalid(
                "filter.data_integrity_tolerance",
                "must be within [0, 1]",
            ));
        }
        if self.spans.max_span_chars == 0 {
            return Err(invalid("spans.max_span_chars", "must be at least 1"));
        }

        let e = &self.embedding;
        if e.backend.trim().is_empty() {
            return Err(invalid("embedding.backend", "must not be empty"));
        }
        if e.batch_size == 0 {
            return Err(invalid("embedding.batch_size", "must be at least 1"));
        }
        if e.max_concurrent_batches == 0 {
            return Err(invalid(
                "embedding.max_concurrent_batches",
                "must be at least 1",
            ));
        }

        let c = &self.clustering;
        if c.target_cluster_count == Some(0) {
            return Err(invalid(
                "clustering.target_cluster_count",
                "must be at least 1 when set",
            ));
        }
        if !(-1.0..=1.0).contains(&c.noise_threshold) {
            return Err(invalid("clustering.noise_threshold", "must be within [-1, 1]"));
        }
        if c.max_iterations == 0 {
            return Err(invalid("clustering.max_iterations", "must be at least 1"));
        }
        if !(c.epsilon > 0.0) {
            return Err(invalid("clustering.epsilon", "must be positive"));
        }
        if c.min_cluster_size == 0 {
            return Err(invalid("clustering.min_cluster_size", "must be at least 1"));
        }

        let s = &self.synthesis;
        if s.backend.trim().is_empty() {
            return Err(invalid("synthesis.backend", "must not be empty"));
        }
        if s.max_concurrent == 0 {
            return Err(invalid("synthesis.max_concurrent", "must be at least 1"));
        }

        let r = &self.retry;
        if r.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be at least 1.0"));
        }
        if r.initial_backoff_ms > r.max_backoff_ms {
            return Err(invalid(
                "retry.initial_backoff_ms",
                "must not exceed retry.max_backoff_ms",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> QuarryError {
    QuarryError::Config(format!("invalid value for {key}: {reason}"))
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Normalizer & filter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Records with fewer upvotes are dropped.
    pub min_engagement: i64,
    /// Records with fewer whitespace-separated words are dropped.
    pub min_word_count: usize,
    /// ISO-639-1 code records must be detected as.
    pub target_language: String,
    /// Fraction of malformed items a stage may exclude before the run fails.
    pub data_integrity_tolerance: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_engagement: 5,
            min_word_count: 10,
            target_language: "en".to_string(),
            data_integrity_tolerance: 0.1,
        }
    }
}

/// Span extraction limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpanConfig {
    pub max_phrases: usize,
    pub min_phrase_words: usize,
    pub max_span_chars: usize,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            max_phrases: 3,
            min_phrase_words: 5,
            max_span_chars: 200,
        }
    }
}

/// Classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifyConfig {
    /// A subcategory is assigned only when its keyword hits exceed this.
    pub subcategory_threshold: usize,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            subcategory_threshold: 1,
        }
    }
}

/// Which text of a classified conversation is sent to the embedding backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingInput {
    #[default]
    CleanTextAndLabel,
    SpansOnly,
}

/// Embedding stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Registry id of the embedding backend.
    pub backend: String,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub input: EmbeddingInput,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            batch_size: 32,
            max_concurrent_batches: 4,
            input: EmbeddingInput::default(),
        }
    }
}

/// Clustering engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringConfig {
    /// Fixed k for k-means++ seeding. Unset means density seeding.
    pub target_cluster_count: Option<usize>,
    /// Minimum cosine similarity to a centroid for membership.
    pub noise_threshold: f64,
    pub random_seed: u64,
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this (cosine distance).
    pub epsilon: f64,
    pub min_cluster_size: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            target_cluster_count: None,
            noise_threshold: 0.5,
            random_seed: 42,
            max_iterations: 100,
            epsilon: 1e-4,
            min_cluster_size: 2,
        }
    }
}

/// Synthesis stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisConfig {
    /// Registry id of the synthesis backend.
    pub backend: String,
    /// Cap on in-flight synthesis calls.
    pub max_concurrent: usize,
    pub max_quotes: usize,
    /// Members whose text is included in the prompt context.
    pub max_context_members: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            max_concurrent: 4,
            max_quotes: 3,
            max_context_members: 12,
        }
    }
}

/// Retry policy shared by transient backend errors and reply parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

/// Connection settings for every built-in backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendsConfig {
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
    pub hash: HashConfig,
}

/// Local model server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
    pub dimensions: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            generation_model: "smollm2:360m".to_string(),
            dimensions: 768,
            temperature: 0.3,
            timeout_secs: 120,
        }
    }
}

/// Hosted API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub dimensions: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            dimensions: 1536,
            temperature: 0.3,
            timeout_secs: 60,
        }
    }
}

/// Offline feature-hash embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashConfig {
    pub dimensions: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}
