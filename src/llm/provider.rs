use async_trait::async_trait;

use super::types::ChatRequest;
use crate::rag::error::Result;

/// Produces an answer from a rendered chat prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// return the backend name (e.g. "openai", "groq", "lmstudio")
    fn name(&self) -> &str;

    /// model identifier sent with each request
    fn model(&self) -> &str;

    /// chat completion (non-streaming); failures are `RagError::Generation`
    async fn generate(&self, request: ChatRequest) -> Result<String>;
}
