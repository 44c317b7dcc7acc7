use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::pipeline::GradingOutcome;
use crate::state::AppState;
use crate::store::GradeStore;

/// Runs one grading pass synchronously and returns its outcome.
pub async fn grade_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<i64>,
) -> impl IntoResponse {
    tracing::info!("Grading requested for attempt {}", attempt_id);
    let outcome = state.orchestrator.grade(attempt_id).await;

    let status = match &outcome {
        GradingOutcome::Graded(_) => StatusCode::OK,
        GradingOutcome::Failed { kind, .. } => match kind.as_str() {
            "submission_not_found" => StatusCode::NOT_FOUND,
            "essay_too_short" | "predecessor_not_graded" | "predecessor_missing" => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            "score_regression" => StatusCode::CONFLICT,
            "provider_timeout" => StatusCode::GATEWAY_TIMEOUT,
            "provider_error" | "malformed_response" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };

    (status, Json(outcome))
}

pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_grading_result(attempt_id).await {
        Ok(Some(result)) => Json(result).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "status": "not_found",
                "message": "No grade stored for this attempt."
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to load result for attempt {}: {}", attempt_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "message": "Database error."
                })),
            )
                .into_response()
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "provider": state.config.provider.kind.as_str(),
        "model": state.config.provider.model,
    }))
}
