//! Inference engines: a quantized GGUF llama and a deterministic echo.
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use docrag_core::config::LlmConfig;
use docrag_core::traits::InferenceEngine;

pub mod echo;
pub mod quantized;

pub use echo::EchoEngine;
pub use quantized::{GenerationParams, QuantizedLlm};

fn env_flag(name: &str) -> bool {
    std::env::var(name).ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Echo engine when `llm.fake` or `APP_USE_FAKE_LLM` is set, the GGUF model otherwise.
pub fn get_default_engine(config: &LlmConfig) -> Result<Arc<dyn InferenceEngine>> {
    if config.fake || env_flag("APP_USE_FAKE_LLM") {
        info!("using EchoEngine");
        return Ok(Arc::new(EchoEngine));
    }
    Ok(Arc::new(QuantizedLlm::from_config(config)?))
}
