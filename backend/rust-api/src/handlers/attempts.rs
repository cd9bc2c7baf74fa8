use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;

use crate::{
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        attempt::{StartAttemptRequest, SubmitAttemptRequest, SubmitAttemptResponse},
        Attempt, AttemptStatus,
    },
    services::{
        attempt_service::{AttemptService, SubmitResult},
        AppState,
    },
};

const HISTORY_LIMIT: i64 = 50;

pub enum AttemptApiError {
    NotFound(String),
    /// Attempt exists but is no longer in progress.
    Conflict(String),
    Internal(String),
}

impl AttemptApiError {
    fn not_found(message: impl Into<String>) -> Self {
        AttemptApiError::NotFound(message.into())
    }

    fn conflict(message: impl Into<String>) -> Self {
        AttemptApiError::Conflict(message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        AttemptApiError::Internal(message.into())
    }
}

impl IntoResponse for AttemptApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AttemptApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AttemptApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AttemptApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(message)).into_response()
    }
}

fn attempt_service(state: &AppState) -> AttemptService {
    AttemptService::new(
        state.quizzes.clone(),
        state.attempts.clone(),
        state.profiles.clone(),
        state.achievements.clone(),
    )
}

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<StartAttemptRequest>,
) -> Result<impl IntoResponse, AttemptApiError> {
    let quiz = state
        .quizzes
        .get(&payload.quiz_id)
        .await
        .map_err(|e| AttemptApiError::internal(format!("Failed to load quiz: {}", e)))?
        .ok_or_else(|| {
            AttemptApiError::not_found(format!("Quiz {} not found", payload.quiz_id))
        })?;

    let response = attempt_service(&state)
        .start(&claims.sub, &quiz)
        .await
        .map_err(|e| AttemptApiError::internal(format!("Failed to start attempt: {}", e)))?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<SubmitAttemptRequest>,
) -> Result<Json<SubmitAttemptResponse>, AttemptApiError> {
    // Foreign attempts 404 rather than 403: their existence is not revealed.
    let attempt = owned_attempt(&state, &claims.sub, &payload.attempt_id).await?;

    if attempt.status != AttemptStatus::InProgress {
        return Err(AttemptApiError::conflict(format!(
            "Attempt {} is not in progress",
            attempt.id
        )));
    }

    let quiz = state
        .quizzes
        .get(&attempt.quiz_id)
        .await
        .map_err(|e| AttemptApiError::internal(format!("Failed to load quiz: {}", e)))?
        .ok_or_else(|| {
            AttemptApiError::internal(format!("Quiz {} missing for attempt", attempt.quiz_id))
        })?;

    let result = attempt_service(&state)
        .submit(attempt, &quiz, &payload.answers, payload.time_taken)
        .await
        .map_err(|e| AttemptApiError::internal(format!("Failed to submit attempt: {}", e)))?;

    match result {
        SubmitResult::Completed(response) => Ok(Json(response)),
        SubmitResult::AlreadyCompleted => Err(AttemptApiError::conflict(format!(
            "Attempt {} was already submitted",
            payload.attempt_id
        ))),
    }
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<Attempt>, AttemptApiError> {
    let attempt = owned_attempt(&state, &claims.sub, &id).await?;
    Ok(Json(attempt))
}

pub async fn attempt_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<serde_json::Value>, AttemptApiError> {
    let attempts = attempt_service(&state)
        .history(&claims.sub, HISTORY_LIMIT)
        .await
        .map_err(|e| AttemptApiError::internal(format!("Failed to load history: {}", e)))?;

    let count = attempts.len();
    Ok(Json(json!({ "attempts": attempts, "count": count })))
}

async fn owned_attempt(
    state: &AppState,
    user_id: &str,
    attempt_id: &str,
) -> Result<Attempt, AttemptApiError> {
    state
        .attempts
        .get(attempt_id)
        .await
        .map_err(|e| AttemptApiError::internal(format!("Failed to load attempt: {}", e)))?
        .filter(|a| a.user_id == user_id)
        .ok_or_else(|| AttemptApiError::not_found(format!("Attempt {} not found", attempt_id)))
}
