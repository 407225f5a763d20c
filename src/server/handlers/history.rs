use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::history::clamp_limit;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.history.recent(clamp_limit(query.limit)).await?;
    Ok(Json(page))
}

pub async fn clear_history(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.history.clear().await?;
    Ok(Json(json!({
        "removed": removed,
        "message": format!("Cleared {} history entries.", removed)
    })))
}

pub async fn delete_history_entry(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.history.delete(index).await? {
        return Err(ApiError::NotFound(format!(
            "History entry {} not found",
            index
        )));
    }
    Ok(Json(json!({
        "deleted": true,
        "index": index,
        "message": format!("Deleted history entry {}.", index)
    })))
}
