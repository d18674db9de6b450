use async_trait::async_trait;
use quarry_core::Result;

/// Turns a prompt plus structured cluster context into free text.
///
/// The caller owns parsing; backends return the raw reply.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    fn id(&self) -> &str;

    async fn synthesize(&self, prompt: &str, context: &serde_json::Value) -> Result<String>;
}

/// Prompt text sent to model servers that take a single string.
pub fn render_prompt(prompt: &str, context: &serde_json::Value) -> String {
    let context = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
    format!("{prompt}\n\nCluster context:\n{context}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_embeds_context() {
        let rendered = render_prompt("Summarize.", &serde_json::json!({"size": 4}));
        assert!(rendered.starts_with("Summarize."));
        assert!(rendered.contains("\"size\": 4"));
    }
}
