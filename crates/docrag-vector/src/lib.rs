//! LanceDB-backed vector storage and the per-directory index manager.
pub mod manager;
pub mod schema;
pub mod search;
pub mod store;
pub mod table;
pub mod writer;

pub use manager::{IndexStatus, VectorIndexManager};
pub use search::LanceIndex;
pub use store::LanceVectorStore;
pub use writer::LanceDbIndexer;
