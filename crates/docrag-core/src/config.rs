//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! [`ServiceConfig`] is the typed view the server runs with; every field has a
//! default so an empty environment still yields a usable configuration.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::defaults(ServiceConfig::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        if let Some(port) = env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            figment = figment.merge(Serialized::default("server.port", port));
        }

        Ok(Self { figment })
    }

    /// Build from an explicit figment, mainly for tests.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(ServiceConfig::default())).merge(figment) }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn service(&self) -> anyhow::Result<ServiceConfig> {
        self.figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract service config: {}", e))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub loader: LoaderConfig,
    pub rag: RagConfig,
    pub cluster: ClusterConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 5000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source_dir: String,
    pub persist_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: "workspace/SOURCE_DOCUMENTS".to_string(),
            persist_dir: "workspace/DB".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn source_root(&self) -> PathBuf {
        expand_path(&self.source_dir)
    }

    pub fn persist_root(&self) -> PathBuf {
        expand_path(&self.persist_dir)
    }
}

/// `threads = 0` sizes the loading pool to the available cores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub seed: u64,
    pub max_iterations: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { seed: 42, max_iterations: 300 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_dir: Option<String>,
    pub fake: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model_path: Option<String>,
    pub tokenizer_path: Option<String>,
    pub max_new_tokens: usize,
    pub context_window: usize,
    pub temperature: f64,
    pub seed: u64,
    pub fake: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            tokenizer_path: None,
            max_new_tokens: 512,
            context_window: 8192,
            temperature: 0.7,
            seed: 299_792_458,
            fake: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let allowed = ["csv", "doc", "docx", "enex", "epub", "html", "md", "odt", "pdf", "ppt", "pptx", "txt"];
        Self { allowed_extensions: allowed.iter().map(|s| (*s).to_string()).collect() }
    }
}

impl UploadConfig {
    pub fn is_allowed(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, ext)) => self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Join a client-supplied name under `base`, refusing anything that could
/// escape it (absolute paths, `..`, empty names).
pub fn confine(base: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name);
    let ok = !name.trim().is_empty()
        && rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !ok {
        return Err(Error::InvalidConfig(format!("'{name}' must be a relative name inside {}", base.display())));
    }
    Ok(base.join(rel))
}
