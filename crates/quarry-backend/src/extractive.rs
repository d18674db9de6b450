//! Offline synthesis that answers from the cluster context alone.

use async_trait::async_trait;
use quarry_core::{QuarryError, Result};
use serde_json::{json, Value};

use crate::synthesis::SynthesisBackend;

/// Deterministic stand-in for a language model.
///
/// Reads `dominant_label`, `dominant_category`, `size` and `negative_share`
/// from the context and replies with the structured JSON object the insight
/// stage expects. Severity grows with support and negative share.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveSynthesis;

impl ExtractiveSynthesis {
    pub const ID: &'static str = "extractive";

    pub fn new() -> Self {
        Self
    }

    fn severity(size: u64, negative_share: f64) -> &'static str {
        if size >= 5 && negative_share > 0.6 {
            "high"
        } else if size >= 3 || negative_share > 0.5 {
            "medium"
        } else {
            "low"
        }
    }

    fn action(category: &str, theme: &str) -> String {
        match category {
            "complaint" => format!("Investigate and fix the reported problem: {theme}"),
            "suggestion" => format!("Evaluate the requested change: {theme}"),
            "question" => format!("Publish a clear answer or guide for: {theme}"),
            "comparison" => format!("Document how the product compares: {theme}"),
            "praise" => format!("Preserve and highlight what users value: {theme}"),
            _ => format!("Review the discussion around: {theme}"),
        }
    }
}

#[async_trait]
impl SynthesisBackend for ExtractiveSynthesis {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn synthesize(&self, _prompt: &str, context: &Value) -> Result<String> {
        let theme = context
            .get("dominant_label")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| QuarryError::Backend("context has no dominant_label".into()))?;
        let category = context
            .get("dominant_category")
            .and_then(Value::as_str)
            .unwrap_or("statement");
        let size = context.get("size").and_then(Value::as_u64).unwrap_or(0);
        let negative_share = context
            .get("negative_share")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let reply = json!({
            "theme": theme,
            "severity": Self::severity(size, negative_share),
            "suggested_action": Self::action(category, theme),
            "rationale": format!(
                "{size} conversations share this theme; {:.0}% of them are negative.",
                negative_share * 100.0
            ),
            "open_questions": [],
        });
        Ok(reply.to_string())
    }
}
