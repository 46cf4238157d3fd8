use docrag_core::traits::InferenceEngine;

/// Returns the prompt unchanged. Lets the whole pipeline run without weights.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoEngine;

impl InferenceEngine for EchoEngine {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(prompt.to_string())
    }
}
