//! Extraction prompt construction
//!
//! The instructions and the chunk go into a single user turn. That turn is
//! rendered with the model's chat template into a raw continuation prompt,
//! and the open assistant turn is primed with the graph built so far so
//! that the model continues the existing list instead of starting over.

use lexgraph_core::{ChatMessage, ChatTemplate, RelationRecord, Result};

use crate::store::to_pretty_json;

/// Fixed relation extraction instructions
pub const EXTRACTION_INSTRUCTIONS: &str = include_str!("prompts/relation_extraction.txt");

/// The single user turn asking for relations in `chunk`
pub fn build_extraction_messages(chunk: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "{}\n\nDocument:\n{chunk}",
        EXTRACTION_INSTRUCTIONS.trim_end()
    ))]
}

/// Text that opens the assistant turn.
///
/// `[` for an empty graph. Otherwise the existing graph as pretty JSON with
/// its closing bracket removed and a trailing comma, so the next record the
/// model writes extends the same array.
pub fn priming_suffix(existing: &[RelationRecord]) -> Result<String> {
    if existing.is_empty() {
        return Ok("[".to_string());
    }

    let pretty = to_pretty_json(existing)?;
    let open = pretty.trim_end();
    let open = open.strip_suffix(']').unwrap_or(open).trim_end();
    Ok(format!("{open},"))
}

/// Build the raw continuation prompt for one engine call.
///
/// Returns `(prompt, primer)`; the prompt already ends with the primer.
pub fn build_continuation_prompt(
    template: ChatTemplate,
    chunk: &str,
    existing: &[RelationRecord],
) -> Result<(String, String)> {
    let primer = priming_suffix(existing)?;
    let mut prompt = template.render(&build_extraction_messages(chunk));
    prompt.push_str(&primer);
    Ok((prompt, primer))
}
