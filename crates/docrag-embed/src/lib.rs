use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use docrag_core::config::{expand_path, EmbeddingConfig};
use docrag_core::traits::Embedder;

pub mod device;
pub mod pool;
pub mod tokenize;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_on_device;

pub const BGE_M3_DIM: usize = 1024;
const BGE_M3_MAX_LEN: usize = 256;

/// BGE-M3 sentence embeddings: XLM-RoBERTa hidden states, masked mean, L2 norm.
pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl BgeM3Embedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading BGE-M3 model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path)?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("BGE-M3 model loaded");
        Ok(Self { model, tokenizer, device })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, BGE_M3_MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((1, BGE_M3_MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let emb: Vec<f32> = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        if emb.len() != BGE_M3_DIM {
            return Err(anyhow!("expected {BGE_M3_DIM}-dim embedding, got {}", emb.len()));
        }
        Ok(emb)
    }
}

impl Embedder for BgeM3Embedder {
    fn dim(&self) -> usize {
        BGE_M3_DIM
    }

    fn max_len(&self) -> usize {
        BGE_M3_MAX_LEN
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let out = texts.iter().map(|t| self.embed_one(t)).collect::<Result<Vec<_>>>()?;
        debug!(texts = texts.len(), elapsed_ms = start.elapsed().as_millis(), "embedded batch");
        Ok(out)
    }
}

/// Hashes whitespace tokens into buckets. Same text, same vector; no model needed.
#[derive(Debug, Clone, Copy)]
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;

        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            {
                let idx = (h as usize) % self.dim;
                let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
                v[idx] += val + (i as f32 % 3.0) * 0.01;
            }
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new(BGE_M3_DIM)
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        BGE_M3_MAX_LEN
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Fake embedder when `embedding.fake` or `APP_USE_FAKE_EMBEDDINGS` is set, BGE-M3 otherwise.
pub fn get_default_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    if config.fake || env_flag("APP_USE_FAKE_EMBEDDINGS") {
        info!("using FakeEmbedder");
        return Ok(Arc::new(FakeEmbedder::default()));
    }
    let dir = resolve_model_dir(config.model_dir.as_deref())?;
    Ok(Arc::new(BgeM3Embedder::load(&dir)?))
}

/// First existing directory of: configured, `APP_MODEL_DIR`, `MODEL_DIR`, `models/bge-m3`.
pub fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(std::env::var("APP_MODEL_DIR").ok().map(PathBuf::from))
        .chain(std::env::var("MODEL_DIR").ok().map(PathBuf::from))
        .chain(std::iter::once(PathBuf::from("models/bge-m3")));
    for dir in candidates {
        if dir.exists() {
            info!(dir = %dir.display(), "using embedding model dir");
            return Ok(dir);
        }
        warn!(dir = %dir.display(), "embedding model dir not found");
    }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
