use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt; // oneshot()

use docrag_core::config::ServiceConfig;
use docrag_embed::FakeEmbedder;
use docrag_llm::EchoEngine;
use docrag_server::{router, AppState};

const COLLECTION: &str = "constitution_docs";

fn test_config(root: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.paths.source_dir = root.join("source").to_string_lossy().into_owned();
    config.paths.persist_dir = root.join("persist").to_string_lossy().into_owned();
    config.loader.threads = 1;
    config
}

fn app(root: &Path) -> Router {
    let state = AppState::new(test_config(root), Arc::new(FakeEmbedder::new(64)), Arc::new(EchoEngine));
    router(state)
}

/// Ten 498-character paragraphs, split 1000/200 small and 3000/200 large.
fn write_fixture(root: &Path) {
    let dir = root.join("source").join(COLLECTION);
    fs::create_dir_all(&dir).unwrap();
    let paragraphs: Vec<String> = (0..10u8).map(|i| char::from(b'a' + i).to_string().repeat(498)).collect();
    fs::write(dir.join("constitution.txt"), paragraphs.join("\n\n")).unwrap();
}

fn split_fields() -> Value {
    json!({
        "path": COLLECTION,
        "small_chunk_size": 1000,
        "small_chunk_overlap": 200,
        "large_chunk_size": 3000,
        "large_chunk_overlap": 200,
    })
}

fn with(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

async fn read_json(resp: axum::response::Response) -> Value {
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_raw(app: &Router, uri: &str, body: impl Into<Body>) -> Value {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    read_json(app.clone().oneshot(req).await.unwrap()).await
}

async fn post(app: &Router, uri: &str, body: &Value) -> Value {
    post_raw(app, uri, serde_json::to_vec(body).unwrap()).await
}

fn assert_success(v: &Value) -> &Value {
    assert_eq!(v["status"], "success", "unexpected response: {v}");
    &v["message"]
}

fn assert_error(v: &Value) -> &str {
    assert_eq!(v["status"], "error", "unexpected response: {v}");
    v["message"].as_str().unwrap()
}

#[tokio::test]
async fn root_serves_banner() {
    let tmp = TempDir::new().unwrap();
    let req = Request::get("/").body(Body::empty()).unwrap();
    let resp = app(tmp.path()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).starts_with("Welcome"));
}

#[tokio::test]
async fn upload_form_posts_to_upload() {
    let tmp = TempDir::new().unwrap();
    let req = Request::get("/upload_form").body(Body::empty()).unwrap();
    let resp = app(tmp.path()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"].to_str().unwrap().starts_with("text/html"));
    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let html = String::from_utf8_lossy(&bytes);
    assert!(html.contains(r#"action="/upload""#));
    assert!(html.contains(r#"name="foldername""#));
    assert!(html.contains("name=file[]"));
}

#[tokio::test]
async fn missing_keys_are_reported_by_name() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let v = post(&app, "/process_documents", &json!({})).await;
    assert_eq!(assert_error(&v), "missing the path key");

    let v = post(&app, "/process_documents", &json!({ "path": COLLECTION })).await;
    assert_eq!(assert_error(&v), "missing the small_chunk_size key");

    let v = post(&app, "/call_rag", &json!({ "dir_name": "db" })).await;
    assert_eq!(assert_error(&v), "missing the path key");
}

#[tokio::test]
async fn malformed_bodies_are_tagged_errors() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let v = post_raw(&app, "/call_llm", "not json").await;
    assert!(assert_error(&v).contains("not valid JSON"));

    let v = post_raw(&app, "/call_llm", "[1, 2]").await;
    assert!(assert_error(&v).contains("JSON object"));
}

#[tokio::test]
async fn process_documents_reports_counts_as_strings() {
    let tmp = TempDir::new().unwrap();
    write_fixture(tmp.path());
    let app = app(tmp.path());

    let v = post(&app, "/process_documents", &split_fields()).await;
    let message = assert_success(&v);
    assert_eq!(message["num_small_docs"], "5");
    assert_eq!(message["num_large_docs"], "2");

    // Cached: different sizes do not reprocess the collection.
    let v = post(&app, "/process_documents", &with(split_fields(), json!({ "small_chunk_size": 300 }))).await;
    assert_eq!(assert_success(&v)["num_small_docs"], "5");
}

#[tokio::test]
async fn traversal_keys_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let v = post(&app, "/process_documents", &with(split_fields(), json!({ "path": "../outside" }))).await;
    assert!(assert_error(&v).starts_with("Invalid configuration"));

    write_fixture(tmp.path());
    let v = post(&app, "/set_db_kv", &with(split_fields(), json!({ "dir_name": "/tmp/escape" }))).await;
    assert!(assert_error(&v).contains("must be a relative name"));
}

#[tokio::test]
async fn clustering_fails_on_too_many_clusters_then_succeeds() {
    let tmp = TempDir::new().unwrap();
    write_fixture(tmp.path());
    let app = app(tmp.path());

    let v = post(&app, "/cluster_docs", &with(split_fields(), json!({ "num_clusters": 10, "cluster_samples": 8 }))).await;
    assert!(assert_error(&v).contains("n_samples=5 should be >= n_clusters=10"));

    // The failure did not evict the processed collection.
    let v = post(&app, "/cluster_docs", &json!({ "path": COLLECTION, "num_clusters": 2, "cluster_samples": 2 })).await;
    let message = assert_success(&v);
    assert_eq!(message["num_clusters"], 2);
    let exemplars = message["num_exemplars"].as_u64().unwrap();
    assert!((2..=4).contains(&exemplars), "exemplars: {exemplars}");

    // Memoised: later parameters are ignored.
    let v = post(&app, "/cluster_docs", &json!({ "path": COLLECTION, "num_clusters": 3, "cluster_samples": 1 })).await;
    assert_eq!(assert_success(&v)["num_clusters"], 2);
}

#[tokio::test]
async fn cluster_requires_processing_or_split_params() {
    let tmp = TempDir::new().unwrap();
    write_fixture(tmp.path());
    let app = app(tmp.path());

    let v = post(&app, "/cluster_docs", &json!({ "path": COLLECTION, "num_clusters": 2, "cluster_samples": 2 })).await;
    assert_eq!(assert_error(&v), "collection 'constitution_docs' has not been processed");
}

#[tokio::test]
async fn doc_prompt_renders_groups_by_text_type() {
    let tmp = TempDir::new().unwrap();
    write_fixture(tmp.path());
    let app = app(tmp.path());
    post(&app, "/process_documents", &split_fields()).await;

    let request = |text_type: &str, doc_number: usize| {
        json!({
            "path": COLLECTION,
            "text_type": text_type,
            "doc_number": doc_number,
            "template": "Summarise:\n|context|",
        })
    };

    let v = post(&app, "/doc_prompt", &request("small_texts", 0)).await;
    let message = assert_success(&v);
    let context = message["context"].as_str().unwrap();
    assert!(context.starts_with("aaaa"));
    assert_eq!(message["response"].as_str().unwrap(), format!("Summarise:\n{context}"));
    assert!(message["metadata"].as_str().unwrap().starts_with("0: {"));

    let v = post(&app, "/doc_prompt", &request("large_texts", 1)).await;
    assert_success(&v);

    let v = post(&app, "/doc_prompt", &request("large_texts", 7)).await;
    assert!(assert_error(&v).starts_with("Not found"));

    let v = post(&app, "/doc_prompt", &request("clusters", 0)).await;
    assert_eq!(assert_error(&v), "clusters for 'constitution_docs' have not been computed");

    post(&app, "/cluster_docs", &json!({ "path": COLLECTION, "num_clusters": 2, "cluster_samples": 2 })).await;
    let v = post(&app, "/doc_prompt", &request("clusters", 1)).await;
    let metadata = assert_success(&v)["metadata"].as_str().unwrap().to_string();
    assert_eq!(metadata.lines().count(), 2);

    let v = post(&app, "/doc_prompt", &request("medium_texts", 0)).await;
    assert!(assert_error(&v).contains("text_type"));
}

#[tokio::test]
async fn set_db_kv_creates_then_finds() {
    let tmp = TempDir::new().unwrap();
    write_fixture(tmp.path());
    let app = app(tmp.path());

    let unprocessed = post(&app, "/set_db_kv", &json!({ "path": COLLECTION, "dir_name": "constitution_db" })).await;
    assert_eq!(assert_error(&unprocessed), "collection 'constitution_docs' has not been processed");

    let body = with(split_fields(), json!({ "dir_name": "constitution_db" }));
    let v = post(&app, "/set_db_kv", &body).await;
    assert_eq!(assert_success(&v)["state"], "db created");
    assert_eq!(v["message"]["result"], "db kv successfully loaded");

    let v = post(&app, "/set_db_kv", &body).await;
    assert_eq!(assert_success(&v)["state"], "db found");

    // A fresh process finds the persisted index without processing anything.
    let restarted = self::app(tmp.path());
    let v = post(&restarted, "/set_db_kv", &json!({ "path": "anything", "dir_name": "constitution_db" })).await;
    assert_eq!(assert_success(&v)["state"], "db found");
}

#[tokio::test]
async fn call_rag_answers_each_question_in_order() {
    let tmp = TempDir::new().unwrap();
    write_fixture(tmp.path());
    let app = app(tmp.path());

    let body = with(
        split_fields(),
        json!({
            "dir_name": "constitution_db",
            "questions": ["What is first?", "What is last?"],
            "template": "Q: |question|\nC: |context|",
            "k": 2,
        }),
    );
    let v = post(&app, "/call_rag", &body).await;
    let answers = assert_success(&v).as_array().unwrap();
    assert_eq!(answers.len(), 2);
    assert!(answers[0]["response"].as_str().unwrap().starts_with("Q: What is first?\nC: "));
    assert!(answers[1]["response"].as_str().unwrap().starts_with("Q: What is last?\nC: "));
    for answer in answers {
        assert!(!answer["context"].as_str().unwrap().is_empty());
        assert_eq!(answer["metadata"].as_str().unwrap().lines().count(), 2);
    }

    // A bare string question is accepted as a single question.
    let v = post(&app, "/call_rag", &with(body, json!({ "questions": "Only one?" }))).await;
    assert_eq!(assert_success(&v).as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn call_llm_returns_generated_text() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let v = post(&app, "/call_llm", &json!({ "prompt": "hello there" })).await;
    assert_eq!(assert_success(&v), "hello there");

    let v = post(&app, "/call_llm", &json!({ "text": "hello" })).await;
    assert_eq!(assert_error(&v), "missing the prompt key");
}

fn multipart_body(boundary: &str, folder: &str, files: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, content) in files {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file[]\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"foldername\"\r\n\r\n{folder}\r\n--{boundary}--\r\n"
    ));
    body
}

#[tokio::test]
async fn upload_saves_allowed_files_and_prepares_directories() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let boundary = "docragboundary";
    let body = multipart_body(
        boundary,
        "notes",
        &[("first note.txt", "Plain text notes."), ("tool.exe", "MZ"), ("../page.html", "<p>Hello</p>")],
    );
    let req = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let v = read_json(app.clone().oneshot(req).await.unwrap()).await;
    let message = assert_success(&v);
    assert_eq!(message["saved"], json!(["first_note.txt", "page.html"]));
    assert_eq!(message["skipped"], json!(["tool.exe"]));

    let docs = tmp.path().join("source").join("notes_docs");
    assert_eq!(fs::read_to_string(docs.join("first_note.txt")).unwrap(), "Plain text notes.");
    assert!(docs.join("page.html").is_file());
    assert!(tmp.path().join("persist").join("notes_db").is_dir());

    let v = post(
        &app,
        "/process_documents",
        &with(split_fields(), json!({ "path": "notes_docs" })),
    )
    .await;
    assert_eq!(assert_success(&v)["num_small_docs"], "2");
}

#[tokio::test]
async fn set_db_kv_on_empty_collection_reports_index_error() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let body = with(split_fields(), json!({ "path": "empty_docs", "dir_name": "empty_db" }));
    let v = post(&app, "/set_db_kv", &body).await;
    assert_eq!(assert_error(&v), "db retrieval Error - collection 'empty_docs' has no chunks to index");
    assert!(!tmp.path().join("persist").join("empty_db").exists());
}

#[tokio::test]
async fn uploaded_csv_is_loaded_by_process_documents() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let boundary = "csvboundary";
    let body = multipart_body(
        boundary,
        "inventory",
        &[("stock.csv", "item,count\nseeds,40\nrope,2\n"), ("manual.pdf", "%PDF-1.4")],
    );
    let req = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let v = read_json(app.clone().oneshot(req).await.unwrap()).await;
    assert_eq!(assert_success(&v)["saved"], json!(["stock.csv", "manual.pdf"]));

    let v = post(&app, "/process_documents", &with(split_fields(), json!({ "path": "inventory_docs" }))).await;
    assert_eq!(assert_success(&v)["num_small_docs"], "1");

    let request = json!({
        "path": "inventory_docs",
        "text_type": "small_texts",
        "doc_number": 0,
        "template": "|context|",
    });
    let v = post(&app, "/doc_prompt", &request).await;
    assert_eq!(assert_success(&v)["context"], "item: seeds\ncount: 40\n\nitem: rope\ncount: 2\n");
}

#[tokio::test]
async fn upload_without_folder_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let app = app(tmp.path());

    let boundary = "b";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file[]\"; filename=\"a.txt\"\r\n\r\nx\r\n--{boundary}--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let v = read_json(app.oneshot(req).await.unwrap()).await;
    assert_eq!(assert_error(&v), "missing the foldername key");
}
