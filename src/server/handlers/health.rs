use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "RAG document Q&A service is running.",
        "health": "/api/health"
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = &state.settings;
    Json(json!({
        "status": "ok",
        "llm_backend": settings.llm.backend.to_string(),
        "llm_model": state.generator.model(),
        "embedding_backend": settings.embedding.backend.to_string(),
        "embedding_model": state.embedder.model_id(),
        "vector_store_ready": state.index.index_exists(),
        "index_loaded": state.index.is_loaded().await,
        "total_vectors": state.index.cached_len().await,
        "chunk_size": settings.chunking.chunk_size,
        "retrieval_k": settings.retrieval.k,
    }))
}
