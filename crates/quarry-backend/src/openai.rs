//! Hosted API backends (`/embeddings`, `/chat/completions`).

use async_trait::async_trait;
use quarry_core::config::OpenAiConfig;
use quarry_core::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::EmbeddingBackend;
use crate::http::{build_client, send_json};
use crate::synthesis::SynthesisBackend;

#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessage,
}

fn api_key(config: &OpenAiConfig) -> Result<String> {
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            QuarryError::Config(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })
}

/// Reorder by `index`; the API does not promise response order.
pub(crate) fn into_ordered(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(QuarryError::Backend(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    if data.iter().enumerate().any(|(i, d)| d.index != i) {
        return Err(QuarryError::Backend("embedding indices are not contiguous".into()));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

/// Embeddings from the hosted API.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedding {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedding {
    pub const ID: &'static str = "openai";

    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        Self::with_api_key(config, api_key(config)?)
    }

    pub fn with_api_key(config: &OpenAiConfig, api_key: String) -> Result<Self> {
        if config.dimensions == 0 {
            return Err(QuarryError::Config(
                "backends.openai.dimensions must be at least 1".into(),
            ));
        }
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.embedding_model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedding {
    fn id(&self) -> &str {
        Self::ID
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(model = %self.model, count = texts.len(), "openai embed");
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbeddingResponse = send_json(
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;
        into_ordered(response.data, texts.len())
    }
}

/// Chat completions from the hosted API.
#[derive(Debug, Clone)]
pub struct OpenAiSynthesis {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiSynthesis {
    pub const ID: &'static str = "openai";

    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        Self::with_api_key(config, api_key(config)?)
    }

    pub fn with_api_key(config: &OpenAiConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.chat_model.clone(),
            temperature: config.temperature,
        })
    }

    pub(crate) fn messages(prompt: &str, context: &serde_json::Value) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".into(),
                content: prompt.to_string(),
            },
            ChatMessage {
                role: "user".into(),
                content: context.to_string(),
            },
        ]
    }
}

#[async_trait]
impl SynthesisBackend for OpenAiSynthesis {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn synthesize(&self, prompt: &str, context: &serde_json::Value) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: Self::messages(prompt, context),
            temperature: self.temperature,
        };
        let response: ChatResponse = send_json(
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| QuarryError::Backend("response carried no choices".into()))
    }
}
