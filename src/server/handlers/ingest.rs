use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestQuery {
    pub force: Option<bool>,
}

/// Rebuilds the index from the documents directory, then drops the cached
/// index so the next question reads the new one.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IngestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let force = query.force.unwrap_or(true);
    let report = state.ingestor.run(force).await?;

    let message = if report.skipped {
        "Index already exists; pass force=true to rebuild.".to_string()
    } else {
        state.index.invalidate().await;
        format!(
            "Ingested {} documents into {} chunks.",
            report.documents_loaded, report.chunks_indexed
        )
    };

    Ok(Json(json!({
        "message": message,
        "documents_loaded": report.documents_loaded,
        "chunks_indexed": report.chunks_indexed,
    })))
}
