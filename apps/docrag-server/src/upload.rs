//! Multipart uploads into `<source>/<folder>_docs` with a matching
//! `<persist>/<folder>_db` directory.
use std::path::Path;

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::response::Html;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use docrag_core::config::confine;
use docrag_core::error::{Error, Result};

use crate::http_api::reply;
use crate::state::AppState;

#[derive(Debug, Default, Serialize)]
pub struct UploadReport {
    pub saved: Vec<String>,
    pub skipped: Vec<String>,
}

const UPLOAD_FORM: &str = r#"<!doctype html>
<title>Upload new Files</title>
<h1>Upload new Files</h1>
<form method=post enctype=multipart/form-data action="/upload">
  <label for="foldername">Folder Name:</label>
  <input type="text" id="foldername" name="foldername" required><br><br>
  <input type=file name=file[] multiple>
  <input type=submit value=Upload>
</form>
"#;

/// Minimal browser form posting to `/upload`.
pub async fn upload_form() -> Html<&'static str> {
    Html(UPLOAD_FORM)
}

pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> Json<Value> {
    reply("upload", store_upload(&state, multipart).await)
}

async fn store_upload(state: &AppState, mut multipart: Multipart) -> Result<UploadReport> {
    let mut folder = None;
    // Files may arrive before the folder name, so hold them until the end.
    let mut files: Vec<(String, Bytes)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidConfig(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "foldername" => {
                let text = field.text().await.map_err(|e| Error::InvalidConfig(format!("unreadable foldername: {e}")))?;
                folder = Some(text.trim().to_string());
            }
            "file" | "file[]" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(|e| Error::InvalidConfig(format!("unreadable file {filename}: {e}")))?;
                files.push((filename, data));
            }
            other => warn!(field = %other, "ignoring unknown multipart field"),
        }
    }

    let folder = folder.ok_or_else(|| Error::MissingParameter("foldername".to_string()))?;
    let config = &state.config;
    let docs_dir = confine(&config.paths.source_root(), &format!("{folder}_docs"))?;
    let db_dir = confine(&config.paths.persist_root(), &format!("{folder}_db"))?;
    for dir in [&docs_dir, &db_dir] {
        tokio::fs::create_dir_all(dir).await.map_err(|e| io_error(dir, e))?;
    }

    let mut report = UploadReport::default();
    for (original, data) in files {
        let safe = secure_filename(&original);
        if safe.is_empty() || !config.upload.is_allowed(&safe) {
            warn!(file = %original, "skipping disallowed upload");
            report.skipped.push(original);
            continue;
        }
        let target = docs_dir.join(&safe);
        tokio::fs::write(&target, &data).await.map_err(|e| io_error(&target, e))?;
        report.saved.push(safe);
    }
    info!(
        folder = %folder,
        saved = report.saved.len(),
        skipped = report.skipped.len(),
        "upload stored"
    );
    Ok(report)
}

fn io_error(path: &Path, e: std::io::Error) -> Error {
    Error::Operation(format!("writing {}: {e}", path.display()))
}

/// Reduce a client file name to a flat ASCII name: directories are dropped,
/// whitespace becomes `_`, anything outside `[A-Za-z0-9._-]` is removed and
/// leading dots or underscores are stripped.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}
