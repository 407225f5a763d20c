use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

/// Failures of the retrieval, ingestion and answering path.
///
/// An empty retrieval result is not an error; callers receive an empty list.
#[derive(Debug, Error)]
pub enum RagError {
    /// Blank question, out-of-range `k` or threshold.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The vector index has not been built yet (or could not be opened).
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// No persisted index exists at the given path.
    #[error("index not found at {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("ingestion failed: {0}")]
    Ingestion(String),
}

impl RagError {
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        RagError::Store(err.to_string())
    }
}
