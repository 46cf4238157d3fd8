use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use docrag_core::cache::DocumentCache;
use docrag_core::cluster::ClusterEngine;
use docrag_core::config::ServiceConfig;
use docrag_core::loader::LoaderRegistry;
use docrag_core::traits::{DocumentSource, Embedder, InferenceEngine};
use docrag_embed::get_default_embedder;
use docrag_llm::get_default_engine;
use docrag_rag::RagService;
use docrag_vector::{LanceVectorStore, VectorIndexManager};

/// Everything a request handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub documents: Arc<DocumentCache>,
    pub source: Arc<dyn DocumentSource>,
    pub embedder: Arc<dyn Embedder>,
    pub clusterer: ClusterEngine,
    pub indexes: Arc<VectorIndexManager>,
    pub rag: Arc<RagService>,
}

impl AppState {
    /// Wire the services around explicit model collaborators.
    pub fn new(config: ServiceConfig, embedder: Arc<dyn Embedder>, engine: Arc<dyn InferenceEngine>) -> Self {
        let source_root = config.paths.source_root();
        let persist_root = config.paths.persist_root();
        info!(
            source = %source_root.display(),
            persist = %persist_root.display(),
            "document and index roots"
        );
        let source = LoaderRegistry::new(source_root).with_threads(config.loader.threads);
        let store = LanceVectorStore::new(persist_root, Arc::clone(&embedder));
        Self {
            documents: Arc::new(DocumentCache::new()),
            source: Arc::new(source),
            clusterer: ClusterEngine::from_config(&config.cluster),
            indexes: Arc::new(VectorIndexManager::new(Arc::new(store))),
            rag: Arc::new(RagService::new(engine, config.rag.top_k)),
            embedder,
            config: Arc::new(config),
        }
    }

    /// Load the configured embedding model and LLM (or their fakes).
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let embedder = get_default_embedder(&config.embedding)?;
        let engine = get_default_engine(&config.llm)?;
        Ok(Self::new(config, embedder, engine))
    }
}
