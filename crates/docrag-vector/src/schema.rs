use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Every persisted index directory holds exactly one table of this name.
pub const TABLE_NAME: &str = "chunks";

pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}
