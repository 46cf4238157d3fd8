use thiserror::Error;

/// Failures surfaced by the document pipeline.
///
/// Every variant renders to a human-readable message; the HTTP layer passes
/// that message back verbatim inside an error response.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing the {0} key")]
    MissingParameter(String),

    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Unsupported file extension '{0}'")]
    UnsupportedFormat(String),

    #[error("invalid cluster configuration: {0}")]
    ClusterConfig(String),

    #[error("db retrieval Error - {0}")]
    IndexBuild(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("collection '{0}' has not been processed")]
    NotProcessed(String),

    #[error("clusters for '{0}' have not been computed")]
    ClustersNotComputed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
