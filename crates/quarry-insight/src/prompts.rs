//! Prompt templates for cluster synthesis.
//!
//! The cluster context travels separately as structured JSON; backends
//! decide how to embed it in the final request.

/// First-attempt instruction for one cluster.
pub const INSIGHT_PROMPT: &str = "\
You are analyzing a cluster of related community conversations about a product.
Each member has its text, a short label, a category and a sentiment.
Summarize what the cluster is about as a single JSON object with these fields:
  \"theme\": a concise 3-8 word description of the shared topic,
  \"severity\": one of \"low\", \"medium\" or \"high\", reflecting how painful and widespread it is,
  \"suggested_action\": one sentence describing what the product team should do,
  \"rationale\": one or two sentences on why this matters,
  \"open_questions\": up to 3 short questions worth investigating.
Base every field on the conversations provided. Reply with the JSON object.";

/// Retry instruction after a reply could not be parsed.
pub const REFORMAT_PROMPT: &str = "\
Your previous reply could not be parsed. Reply with ONLY one JSON object and
nothing else: no prose, no explanation, no markdown outside the object.
Required fields: \"theme\" (non-empty string), \"severity\" (exactly \"low\",
\"medium\" or \"high\"), \"suggested_action\" (non-empty string).
Optional fields: \"rationale\" (string), \"open_questions\" (array of at most 3 strings).
Use the cluster context provided.";

/// Prompt for the given attempt; the first attempt uses [`INSIGHT_PROMPT`].
pub fn for_attempt(attempt: u32) -> &'static str {
    if attempt == 0 {
        INSIGHT_PROMPT
    } else {
        REFORMAT_PROMPT
    }
}
