//! Retrieval-augmented prompting over cached chunk groups and vector indexes.
pub mod prompt;
pub mod render;

pub use prompt::{QaRecord, RagService};
pub use render::{fill_template, render_context, RenderedContext, CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER};
