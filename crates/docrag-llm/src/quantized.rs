//! Quantized llama inference from a GGUF file via candle.
use anyhow::{anyhow, Context, Result};
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama::ModelWeights;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use docrag_core::config::{expand_path, LlmConfig};
use docrag_core::traits::InferenceEngine;
use docrag_embed::select_device;

const EOS_TOKEN: &str = "</s>";

#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub context_window: usize,
    /// `<= 0.0` selects greedy decoding.
    pub temperature: f64,
    pub seed: u64,
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_new_tokens: config.max_new_tokens,
            context_window: config.context_window,
            temperature: config.temperature,
            seed: config.seed,
        }
    }
}

pub struct QuantizedLlm {
    /// The KV cache lives inside the weights, so one generation at a time.
    model: Mutex<ModelWeights>,
    tokenizer: Tokenizer,
    device: Device,
    eos_token: Option<u32>,
    params: GenerationParams,
}

impl QuantizedLlm {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let model_path = config
            .model_path
            .as_deref()
            .map(expand_path)
            .ok_or_else(|| anyhow!("llm.model_path is not set"))?;
        let tokenizer_path = match config.tokenizer_path.as_deref() {
            Some(p) => expand_path(p),
            None => sibling_tokenizer(&model_path),
        };
        Self::load(&model_path, &tokenizer_path, GenerationParams::from(config))
    }

    pub fn load(model_path: &Path, tokenizer_path: &Path, params: GenerationParams) -> Result<Self> {
        let device = select_device();
        let start = Instant::now();
        let mut file = std::fs::File::open(model_path).with_context(|| format!("opening {}", model_path.display()))?;
        let content = gguf_file::Content::read(&mut file).map_err(|e| e.with_path(model_path))?;
        let model = ModelWeights::from_gguf(content, &mut file, &device)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let eos_token = tokenizer.token_to_id(EOS_TOKEN);
        info!(
            model = %model_path.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "quantized model loaded"
        );
        Ok(Self { model: Mutex::new(model), tokenizer, device, eos_token, params })
    }

    fn prompt_tokens(&self, prompt: &str) -> Result<Vec<u32>> {
        let encoding = self.tokenizer.encode(prompt, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        let mut tokens = encoding.get_ids().to_vec();
        let budget = self.params.context_window.saturating_sub(self.params.max_new_tokens).max(1);
        if tokens.len() > budget {
            debug!(prompt_tokens = tokens.len(), budget, "truncating prompt from the front");
            tokens.drain(..tokens.len() - budget);
        }
        Ok(tokens)
    }
}

impl InferenceEngine for QuantizedLlm {
    fn generate(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let tokens = self.prompt_tokens(prompt)?;
        let temperature = (self.params.temperature > 0.0).then_some(self.params.temperature);
        let mut logits_processor = LogitsProcessor::new(self.params.seed, temperature, None);

        let mut model = self.model.lock();
        let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = model.forward(&input, 0)?.squeeze(0)?;
        let mut next = logits_processor.sample(&logits)?;

        let mut generated = Vec::new();
        for index in 0..self.params.max_new_tokens {
            if Some(next) == self.eos_token {
                break;
            }
            generated.push(next);
            let input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
            let logits = model.forward(&input, tokens.len() + index)?.squeeze(0)?;
            next = logits_processor.sample(&logits)?;
        }
        drop(model);

        let text = self.tokenizer.decode(&generated, true).map_err(|e| anyhow!("Decoding failed: {}", e))?;
        info!(
            prompt_tokens = tokens.len(),
            generated = generated.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "generation finished"
        );
        Ok(text.trim().to_string())
    }
}

fn sibling_tokenizer(model_path: &Path) -> PathBuf {
    model_path.parent().map_or_else(|| PathBuf::from("tokenizer.json"), |dir| dir.join("tokenizer.json"))
}
