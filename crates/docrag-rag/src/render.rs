use serde::Serialize;

use docrag_core::types::Chunk;

pub const QUESTION_PLACEHOLDER: &str = "|question|";
pub const CONTEXT_PLACEHOLDER: &str = "|context|";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedContext {
    pub context: String,
    pub metadata: String,
}

/// One line of trimmed content per chunk, and one `"{i}: {json}"` line of
/// metadata per chunk, both newline-terminated.
pub fn render_context(chunks: &[Chunk]) -> RenderedContext {
    let mut out = RenderedContext::default();
    for (i, chunk) in chunks.iter().enumerate() {
        let meta = serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".to_string());
        out.metadata.push_str(&format!("{i}: {meta}\n"));
        out.context.push_str(chunk.content.trim());
        out.context.push('\n');
    }
    out
}

/// Substitute the question first, then the context.
pub fn fill_template(template: &str, question: Option<&str>, context: &str) -> String {
    let with_question = match question {
        Some(q) => template.replace(QUESTION_PLACEHOLDER, q),
        None => template.to_string(),
    };
    with_question.replace(CONTEXT_PLACEHOLDER, context)
}
