//! Local model server backends (`/api/embed`, `/api/generate`).

use async_trait::async_trait;
use quarry_core::config::OllamaConfig;
use quarry_core::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::EmbeddingBackend;
use crate::http::{build_client, send_json};
use crate::synthesis::{render_prompt, SynthesisBackend};

#[derive(Debug, Serialize)]
pub(crate) struct EmbedRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: String,
    pub stream: bool,
    pub format: &'a str,
    pub options: GenerateOptions,
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerateOptions {
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponse {
    pub response: String,
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Embeddings from a local model server.
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedding {
    pub const ID: &'static str = "ollama";

    pub fn new(config: &OllamaConfig) -> Result<Self> {
        if config.dimensions == 0 {
            return Err(QuarryError::Config(
                "backends.ollama.dimensions must be at least 1".into(),
            ));
        }
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: endpoint(&config.base_url, "api/embed"),
            model: config.embedding_model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedding {
    fn id(&self) -> &str {
        Self::ID
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(model = %self.model, count = texts.len(), "ollama embed");
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbedResponse = send_json(self.client.post(&self.url).json(&body)).await?;
        if response.embeddings.len() != texts.len() {
            return Err(QuarryError::Backend(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }
}

/// Text generation from a local model server.
#[derive(Debug, Clone)]
pub struct OllamaSynthesis {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OllamaSynthesis {
    pub const ID: &'static str = "ollama";

    pub fn new(config: &OllamaConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: endpoint(&config.base_url, "api/generate"),
            model: config.generation_model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl SynthesisBackend for OllamaSynthesis {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn synthesize(&self, prompt: &str, context: &serde_json::Value) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: render_prompt(prompt, context),
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };
        let response: GenerateResponse = send_json(self.client.post(&self.url).json(&body)).await?;
        Ok(response.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("http://localhost:11434/", "api/embed"),
            "http://localhost:11434/api/embed"
        );
    }

    #[test]
    fn test_embed_request_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(EmbedRequest {
            model: "nomic-embed-text",
            input: &input,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "nomic-embed-text", "input": ["a", "b"]})
        );
    }

    #[test]
    fn test_embed_response_parses() {
        let response: EmbedResponse =
            serde_json::from_str(r#"{"model":"m","embeddings":[[0.1,0.2],[0.3,0.4]]}"#).unwrap();
        assert_eq!(response.embeddings.len(), 2);
    }

    #[test]
    fn test_generate_request_disables_streaming() {
        let body = serde_json::to_value(GenerateRequest {
            model: "smollm2:360m",
            prompt: "p".into(),
            stream: false,
            format: "json",
            options: GenerateOptions { temperature: 0.3 },
        })
        .unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert!((body["options"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_generate_response_parses() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"model":"m","response":"{\"theme\":\"x\"}","done":true}"#)
                .unwrap();
        assert_eq!(response.response, "{\"theme\":\"x\"}");
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let config = OllamaConfig {
            dimensions: 0,
            ..OllamaConfig::default()
        };
        assert!(matches!(
            OllamaEmbedding::new(&config),
            Err(QuarryError::Config(_))
        ));
    }

    #[test]
    fn test_backend_ids() {
        let config = OllamaConfig::default();
        let embed = OllamaEmbedding::new(&config).unwrap();
        assert_eq!(embed.id(), "ollama");
        assert_eq!(embed.dimensions(), 768);
        assert_eq!(OllamaSynthesis::new(&config).unwrap().id(), "ollama");
    }
}
