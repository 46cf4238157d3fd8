//! Extension-keyed loader registry.
//!
//! A collection key names a directory under the source root. Every file below
//! it whose extension has a registered loader is parsed in parallel; files
//! that fail to load are logged and skipped so one bad file never sinks the
//! whole collection.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::confine;
use crate::error::{Error, Result};
use crate::traits::{DocumentLoader, DocumentSource};
use crate::types::Document;

/// Reads a file as UTF-8, falling back to lossy decoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<Document> {
        let raw_text = read_file_content(path)?;
        Ok(Document::new(raw_text, path.to_string_lossy()))
    }
}

/// Strips markup from HTML, dropping `script` and `style` bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlLoader;

impl DocumentLoader for HtmlLoader {
    fn load(&self, path: &Path) -> Result<Document> {
        let html = read_file_content(path)?;
        Ok(Document::new(html_to_text(&html), path.to_string_lossy()))
    }
}

/// One section per row, each line `header: value`, sections separated by a
/// blank line. Invalid UTF-8 is decoded lossily.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvLoader;

impl DocumentLoader for CsvLoader {
    fn load(&self, path: &Path) -> Result<Document> {
        let load_error = |e: csv::Error| Error::Load { path: path.display().to_string(), reason: e.to_string() };
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path).map_err(load_error)?;
        let headers: Vec<String> = reader
            .byte_headers()
            .map_err(load_error)?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.byte_records() {
            let record = record.map_err(load_error)?;
            let lines: Vec<String> = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| format!("{header}: {}", String::from_utf8_lossy(value).trim()))
                .collect();
            rows.push(lines.join("\n"));
        }
        Ok(Document::new(rows.join("\n\n"), path.to_string_lossy()))
    }
}

pub struct LoaderRegistry {
    source_root: PathBuf,
    loaders: HashMap<String, Arc<dyn DocumentLoader>>,
    threads: usize,
}

impl LoaderRegistry {
    /// Registry with the built-in plain-text, CSV and HTML loaders.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        let mut registry = Self::empty(source_root);
        let text: Arc<dyn DocumentLoader> = Arc::new(TextLoader);
        for ext in ["txt", "md", "py", "rst", "log"] {
            registry.register(ext, Arc::clone(&text));
        }
        registry.register("csv", Arc::new(CsvLoader));
        registry.register("html", Arc::new(HtmlLoader));
        registry.register("htm", Arc::new(HtmlLoader));
        registry
    }

    pub fn empty(source_root: impl Into<PathBuf>) -> Self {
        Self { source_root: source_root.into(), loaders: HashMap::new(), threads: 0 }
    }

    /// Size of the loading pool; 0 means one thread per available core.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn register(&mut self, extension: &str, loader: Arc<dyn DocumentLoader>) {
        self.loaders.insert(extension.trim_start_matches('.').to_ascii_lowercase(), loader);
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.loaders.contains_key(&ext))
    }

    /// Load one file directly. Unknown extensions are a hard error here.
    pub fn load(&self, path: &Path) -> Result<Document> {
        let ext = extension_of(path).unwrap_or_default();
        let loader = self.loaders.get(&ext).ok_or_else(|| Error::UnsupportedFormat(format!(".{ext}")))?;
        loader.load(path)
    }

    fn pool_size(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(8)
        }
    }

    /// Load a batch of files on a bounded pool, skipping failures.
    ///
    /// Output keeps the order of `files`.
    pub fn load_all(&self, files: &[PathBuf]) -> Result<Vec<Document>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.pool_size())
            .build()
            .map_err(|e| Error::Operation(format!("failed to start loader pool: {e}")))?;
        let pb = progress_bar(files.len());
        let loaded: Vec<Option<Document>> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let result = self.load(path);
                    pb.inc(1);
                    match result {
                        Ok(doc) => Some(doc),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "failed to load document, skipping");
                            None
                        }
                    }
                })
                .collect()
        });
        pb.finish_and_clear();
        Ok(loaded.into_iter().flatten().collect())
    }
}

impl DocumentSource for LoaderRegistry {
    fn enumerate(&self, source_dir: &Path) -> Vec<PathBuf> {
        walk_files(source_dir).into_iter().filter(|p| self.supports(p)).collect()
    }

    fn load_collection(&self, key: &str) -> Result<Vec<Document>> {
        let dir = confine(&self.source_root, key)?;
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "source directory does not exist");
            return Ok(Vec::new());
        }
        let (files, unsupported): (Vec<PathBuf>, Vec<PathBuf>) =
            walk_files(&dir).into_iter().partition(|p| self.supports(p));
        for path in &unsupported {
            warn!(path = %path.display(), "no loader registered for this extension, skipping");
        }
        info!(dir = %dir.display(), files = files.len(), skipped = unsupported.len(), "loading documents");
        let documents = self.load_all(&files)?;
        info!(loaded = documents.len(), dir = %dir.display(), "loaded documents");
        Ok(documents)
    }
}

/// Every regular file below `dir`, sorted.
fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} Loading documents [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase)
}

fn read_file_content(file_path: &Path) -> Result<String> {
    let bytes = fs::read(file_path)
        .map_err(|e| Error::Load { path: file_path.display().to_string(), reason: e.to_string() })?;
    match String::from_utf8(bytes) {
        Ok(content) => Ok(content),
        Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}

const BLOCK_TAGS: [&str; 12] = ["p", "br", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section"];

fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = after[..end].trim().to_ascii_lowercase();
        rest = &after[end + 1..];
        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();
        if !closing && (name == "script" || name == "style") {
            let close = format!("</{name}");
            rest = rest.to_ascii_lowercase().find(&close).map_or("", |pos| &rest[pos..]);
            continue;
        }
        if BLOCK_TAGS.contains(&name) {
            out.push('\n');
        }
    }
    out.push_str(rest);

    let decoded = decode_entities(&out);
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in decoded.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs.join("\n\n")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
