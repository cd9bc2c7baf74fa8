use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use validator::Validate;

use crate::{
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        quiz::{CreateQuizRequest, GenerateQuizRequest, ListQuizzesQuery, Quiz, TakeQuizView},
        AchievementView,
    },
    services::{
        generation_service::{GenerationError, GenerationService},
        quiz_service::{shuffled_take_view, QuizService},
        AppState,
    },
};

pub enum QuizApiError {
    BadRequest(String),
    NotFound(String),
    /// Every generation provider failed or returned garbage.
    Upstream(String),
    Internal(String),
}

impl QuizApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        QuizApiError::BadRequest(message.into())
    }

    fn not_found(message: impl Into<String>) -> Self {
        QuizApiError::NotFound(message.into())
    }

    fn upstream(message: impl Into<String>) -> Self {
        QuizApiError::Upstream(message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        QuizApiError::Internal(message.into())
    }
}

impl IntoResponse for QuizApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            QuizApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            QuizApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            QuizApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            QuizApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(message)).into_response()
    }
}

impl From<GenerationError> for QuizApiError {
    fn from(e: GenerationError) -> Self {
        QuizApiError::upstream(format!("Quiz generation failed: {}", e))
    }
}

fn quiz_service(state: &AppState) -> QuizService {
    QuizService::new(
        state.quizzes.clone(),
        state.profiles.clone(),
        state.achievements.clone(),
    )
}

pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<CreateQuizRequest>,
) -> Result<impl IntoResponse, QuizApiError> {
    payload
        .validate()
        .map_err(|e| QuizApiError::bad_request(format!("Invalid quiz: {}", e)))?;

    let (quiz, unlocked) = quiz_service(&state)
        .create(&claims.sub, payload)
        .await
        .map_err(|e| QuizApiError::internal(format!("Failed to create quiz: {}", e)))?;

    Ok((StatusCode::CREATED, Json(creation_response(quiz, unlocked))))
}

pub async fn generate_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(payload): AppJson<GenerateQuizRequest>,
) -> Result<impl IntoResponse, QuizApiError> {
    payload
        .validate()
        .map_err(|e| QuizApiError::bad_request(format!("Invalid generation request: {}", e)))?;

    let generator = GenerationService::new(state.config.generation.clone());
    let questions = generator.generate(&payload).await?;

    let (quiz, unlocked) = quiz_service(&state)
        .create_generated(&claims.sub, payload, questions)
        .await
        .map_err(|e| QuizApiError::internal(format!("Failed to store generated quiz: {}", e)))?;

    Ok((StatusCode::CREATED, Json(creation_response(quiz, unlocked))))
}

fn creation_response(
    quiz: Quiz,
    unlocked: Vec<crate::models::Achievement>,
) -> serde_json::Value {
    let unlocked: Vec<AchievementView> = unlocked.iter().map(AchievementView::from).collect();
    json!({
        "quiz": quiz,
        "unlocked_achievements": unlocked,
    })
}

pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuizzesQuery>,
) -> Result<Json<serde_json::Value>, QuizApiError> {
    let quizzes = quiz_service(&state)
        .list(&query)
        .await
        .map_err(|e| QuizApiError::internal(format!("Failed to list quizzes: {}", e)))?;

    let count = quizzes.len();
    Ok(Json(json!({ "quizzes": quizzes, "count": count })))
}

/// Full quiz document, correct answers included, for the author's review.
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Quiz>, QuizApiError> {
    let quiz = load_quiz(&state, &id).await?;
    Ok(Json(quiz))
}

/// Player-facing view: questions shuffled, answers and explanations held
/// back until submission.
pub async fn take_quiz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TakeQuizView>, QuizApiError> {
    let quiz = load_quiz(&state, &id).await?;
    Ok(Json(shuffled_take_view(&quiz)))
}

async fn load_quiz(state: &AppState, id: &str) -> Result<Quiz, QuizApiError> {
    state
        .quizzes
        .get(id)
        .await
        .map_err(|e| QuizApiError::internal(format!("Failed to load quiz: {}", e)))?
        .ok_or_else(|| QuizApiError::not_found(format!("Quiz {} not found", id)))
}
