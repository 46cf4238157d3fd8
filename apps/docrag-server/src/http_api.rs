//! JSON gateway. Every route answers HTTP 200 with `{status, message}`.
use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use docrag_core::cache::ProcessedCollection;
use docrag_core::error::{Error, Result};
use docrag_core::traits::VectorIndex;
use docrag_core::types::Chunk;
use docrag_vector::IndexStatus;

use crate::request::{
    cluster_params, optional_split_params, optional_usize_field, parse_body, require, split_params,
    string_field, string_list_field, text_type_field, usize_field,
};
use crate::state::AppState;
use crate::upload::{upload, upload_form};

pub const BANNER: &str =
    "Welcome to the docrag gateway! POST JSON to /process_documents, /cluster_docs, /set_db_kv, /call_rag, /doc_prompt or /call_llm, or multipart to /upload (form at /upload_form).";

const UPLOAD_LIMIT_BYTES: usize = 256 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::<AppState>::new()
        .route("/", get(welcome))
        .route("/process_documents", post(process_documents))
        .route("/cluster_docs", post(cluster_docs))
        .route("/set_db_kv", post(set_db_kv))
        .route("/call_rag", post(call_rag))
        .route("/doc_prompt", post(doc_prompt))
        .route("/call_llm", post(call_llm))
        .route("/upload_form", get(upload_form))
        .route("/upload", post(upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)))
        .with_state(state)
}

/// Wrap a handler outcome in the tagged response shape.
pub fn reply<T: Serialize>(route: &str, result: Result<T>) -> Json<Value> {
    match result {
        Ok(message) => {
            info!(route, "request succeeded");
            Json(json!({ "status": "success", "message": message }))
        }
        Err(e) => {
            error!(route, error = %e, "request failed");
            Json(json!({ "status": "error", "message": e.to_string() }))
        }
    }
}

/// Run CPU-bound or blocking work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Operation(format!("worker task failed: {e}")))?
}

async fn welcome() -> &'static str {
    BANNER
}

/// The processed collection named by `path`, processing it first when the
/// body carries split parameters.
async fn processed(state: &AppState, body: &Value) -> Result<Arc<ProcessedCollection>> {
    let path = string_field(body, "path")?;
    match optional_split_params(body)? {
        Some(params) => {
            let documents = Arc::clone(&state.documents);
            let source = Arc::clone(&state.source);
            blocking(move || documents.ensure_processed(&path, source.as_ref(), &params)).await
        }
        None => state.documents.get(&path).ok_or(Error::NotProcessed(path)),
    }
}

async fn ensure_index(state: &AppState, body: &Value) -> Result<(Arc<dyn VectorIndex>, IndexStatus)> {
    let dir_name = string_field(body, "dir_name")?;
    if let Some(index) = state.indexes.cached(&dir_name) {
        return Ok((index, IndexStatus::Found));
    }
    let path = string_field(body, "path")?;
    let collection = match optional_split_params(body)? {
        Some(_) => Some(processed(state, body).await?),
        None => state.documents.get(&path),
    };
    let chunks: &[Chunk] = collection.as_ref().map(|c| c.small_chunks.as_slice()).unwrap_or_default();
    if chunks.is_empty() {
        // Nothing to build from: only an index that already exists will do.
        return match state.indexes.open_existing(&dir_name).await? {
            Some(index) => Ok((index, IndexStatus::Found)),
            None if collection.is_none() => Err(Error::NotProcessed(path)),
            None => Err(Error::IndexBuild(format!("collection '{path}' has no chunks to index"))),
        };
    }
    state.indexes.get_or_create(&dir_name, chunks).await
}

async fn process_documents(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let result = async {
        let body = parse_body(&body)?;
        require(&body, &["path"])?;
        let params = split_params(&body)?;
        let path = string_field(&body, "path")?;
        let documents = Arc::clone(&state.documents);
        let source = Arc::clone(&state.source);
        let collection = blocking(move || documents.ensure_processed(&path, source.as_ref(), &params)).await?;
        info!(
            num_small_docs = collection.small_chunks.len(),
            num_large_docs = collection.large_chunks.len(),
            "documents processed"
        );
        Ok::<_, Error>(json!({
            "num_small_docs": collection.small_chunks.len().to_string(),
            "num_large_docs": collection.large_chunks.len().to_string(),
        }))
    }
    .await;
    reply("process_documents", result)
}

async fn cluster_docs(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let result = async {
        let body = parse_body(&body)?;
        require(&body, &["path", "num_clusters", "cluster_samples"])?;
        let params = cluster_params(&body)?;
        let collection = processed(&state, &body).await?;
        let embedder = Arc::clone(&state.embedder);
        let engine = state.clusterer;
        let groups = blocking(move || {
            collection.clusters_or_compute(|small| engine.cluster(embedder.as_ref(), small, &params))
        })
        .await?;
        let exemplars: HashSet<&Chunk> = groups.iter().flatten().collect();
        Ok::<_, Error>(json!({ "num_clusters": groups.len(), "num_exemplars": exemplars.len() }))
    }
    .await;
    reply("cluster_docs", result)
}

async fn set_db_kv(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let result = async {
        let body = parse_body(&body)?;
        require(&body, &["path", "dir_name"])?;
        let (_, status) = ensure_index(&state, &body).await?;
        let db_state = match status {
            IndexStatus::Found => "db found",
            IndexStatus::Created => "db created",
        };
        Ok::<_, Error>(json!({ "result": "db kv successfully loaded", "state": db_state }))
    }
    .await;
    reply("set_db_kv", result)
}

async fn call_rag(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let result = async {
        let body = parse_body(&body)?;
        require(&body, &["dir_name", "path", "questions", "template"])?;
        let questions = string_list_field(&body, "questions")?;
        let template = string_field(&body, "template")?;
        let k = optional_usize_field(&body, "k")?;
        let (index, _) = ensure_index(&state, &body).await?;
        state.rag.answer_questions(index.as_ref(), &questions, &template, k).await
    }
    .await;
    reply("call_rag", result)
}

async fn doc_prompt(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let result = async {
        let body = parse_body(&body)?;
        require(&body, &["path", "text_type", "doc_number", "template"])?;
        let path = string_field(&body, "path")?;
        let text_type = text_type_field(&body, "text_type")?;
        let doc_number = usize_field(&body, "doc_number")?;
        let template = string_field(&body, "template")?;
        let collection = state.documents.get(&path).ok_or(Error::NotProcessed(path))?;
        let group = collection.group(text_type, doc_number)?;
        let rag = Arc::clone(&state.rag);
        blocking(move || rag.doc_prompt(&group, &template)).await
    }
    .await;
    reply("doc_prompt", result)
}

async fn call_llm(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let result = async {
        let body = parse_body(&body)?;
        let prompt = string_field(&body, "prompt")?;
        let rag = Arc::clone(&state.rag);
        blocking(move || rag.call_llm(&prompt)).await
    }
    .await;
    reply("call_llm", result)
}
