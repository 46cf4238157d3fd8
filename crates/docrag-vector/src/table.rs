//! LanceDB connection helpers.
use anyhow::Result;
use lancedb::{connect, Connection};
use std::path::Path;

pub async fn open_db(path: &Path) -> Result<Connection> {
    Ok(connect(path.to_string_lossy().as_ref()).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await?;
    Ok(names.iter().any(|n| n == name))
}
