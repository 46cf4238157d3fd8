//! Pulling typed fields out of loosely shaped JSON request bodies.
use serde_json::Value;

use docrag_core::error::{Error, Result};
use docrag_core::types::{ClusterParams, SplitParams, TextType};

pub fn parse_body(bytes: &[u8]) -> Result<Value> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidConfig(format!("request body is not valid JSON: {e}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(Error::InvalidConfig("request body must be a JSON object".to_string()))
    }
}

/// Fails on the first absent key, in the order given.
pub fn require(body: &Value, keys: &[&str]) -> Result<()> {
    match keys.iter().find(|k| body.get(**k).is_none()) {
        Some(missing) => Err(Error::MissingParameter((*missing).to_string())),
        None => Ok(()),
    }
}

pub fn string_field(body: &Value, key: &str) -> Result<String> {
    match body.get(key) {
        None => Err(Error::MissingParameter(key.to_string())),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::InvalidConfig(format!("{key} must be a string, got {other}"))),
    }
}

/// Accepts a non-negative integer or a string holding one.
pub fn usize_field(body: &Value, key: &str) -> Result<usize> {
    let invalid = || Error::InvalidConfig(format!("{key} must be a non-negative integer"));
    match body.get(key) {
        None => Err(Error::MissingParameter(key.to_string())),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

pub fn optional_usize_field(body: &Value, key: &str) -> Result<Option<usize>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => usize_field(body, key).map(Some),
    }
}

/// A list of strings; a bare string counts as a one-element list.
pub fn string_list_field(body: &Value, key: &str) -> Result<Vec<String>> {
    let invalid = || Error::InvalidConfig(format!("{key} must be a list of strings"));
    match body.get(key) {
        None => Err(Error::MissingParameter(key.to_string())),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

pub fn split_params(body: &Value) -> Result<SplitParams> {
    require(body, &SplitParams::FIELDS)?;
    Ok(SplitParams {
        small_chunk_size: usize_field(body, "small_chunk_size")?,
        small_chunk_overlap: usize_field(body, "small_chunk_overlap")?,
        large_chunk_size: usize_field(body, "large_chunk_size")?,
        large_chunk_overlap: usize_field(body, "large_chunk_overlap")?,
    })
}

/// `None` when no split field is present; any one present means all four are required.
pub fn optional_split_params(body: &Value) -> Result<Option<SplitParams>> {
    if SplitParams::FIELDS.iter().any(|k| body.get(*k).is_some()) {
        split_params(body).map(Some)
    } else {
        Ok(None)
    }
}

pub fn cluster_params(body: &Value) -> Result<ClusterParams> {
    Ok(ClusterParams {
        num_clusters: usize_field(body, "num_clusters")?,
        cluster_samples: usize_field(body, "cluster_samples")?,
    })
}

pub fn text_type_field(body: &Value, key: &str) -> Result<TextType> {
    let raw = body.get(key).ok_or_else(|| Error::MissingParameter(key.to_string()))?;
    serde_json::from_value(raw.clone())
        .map_err(|_| Error::InvalidConfig(format!("{key} must be one of small_texts, large_texts, clusters; got {raw}")))
}
