use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize embedding backend: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("Failed to initialize LLM backend: {0}")]
    Llm(#[source] anyhow::Error),

    #[error("Failed to initialize RAG pipeline: {0}")]
    Rag(#[source] anyhow::Error),
}
