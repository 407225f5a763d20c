use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::core::errors::ApiError;
use crate::history::HistoryEntry;
use crate::rag::{AskOutcome, AskRequest};
use crate::state::AppState;

/// Answers a question and records the interaction, successful or not.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskOutcome>, ApiError> {
    let question = request.question.trim().to_string();

    match state.pipeline.ask(request).await {
        Ok(outcome) => {
            state
                .history
                .append(&HistoryEntry::answered(
                    outcome.question.clone(),
                    outcome.answer.clone(),
                    outcome.sources.clone(),
                    outcome.chunks_retrieved,
                ))
                .await;
            Ok(Json(outcome))
        }
        Err(err) => {
            tracing::warn!("Question failed: {}", err);
            state
                .history
                .append(&HistoryEntry::failed(question, err.to_string()))
                .await;
            Err(err.into())
        }
    }
}
