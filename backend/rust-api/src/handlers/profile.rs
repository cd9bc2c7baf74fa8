use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    middlewares::auth::JwtClaims,
    services::{
        profile_service::{ProfileService, ProfileView},
        AppState,
    },
};

pub enum ProfileApiError {
    Internal(String),
}

impl ProfileApiError {
    fn internal(message: impl Into<String>) -> Self {
        ProfileApiError::Internal(message.into())
    }
}

impl IntoResponse for ProfileApiError {
    fn into_response(self) -> Response {
        let ProfileApiError::Internal(message) = self;
        (StatusCode::INTERNAL_SERVER_ERROR, Json(message)).into_response()
    }
}

fn profile_service(state: &AppState) -> ProfileService {
    ProfileService::new(
        state.profiles.clone(),
        state.achievements.clone(),
        state.redis.clone(),
    )
}

/// The caller's profile, created with defaults on first sight. A streak that
/// lapsed while the user was away is already zeroed in the response.
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<ProfileView>, ProfileApiError> {
    let view = profile_service(&state)
        .profile(&claims.sub, Utc::now().date_naive())
        .await
        .map_err(|e| ProfileApiError::internal(format!("Failed to load profile: {}", e)))?;

    Ok(Json(view))
}

/// The full badge catalog. Not user-scoped and served without auth.
pub async fn list_achievements(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ProfileApiError> {
    let achievements = profile_service(&state)
        .catalog()
        .await
        .map_err(|e| ProfileApiError::internal(format!("Failed to load achievements: {}", e)))?;

    let count = achievements.len();
    Ok(Json(json!({ "achievements": achievements, "count": count })))
}

pub async fn user_achievements(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<serde_json::Value>, ProfileApiError> {
    let achievements = profile_service(&state)
        .unlocked(&claims.sub)
        .await
        .map_err(|e| {
            ProfileApiError::internal(format!("Failed to load unlocked achievements: {}", e))
        })?;

    let count = achievements.len();
    Ok(Json(json!({ "achievements": achievements, "count": count })))
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ProfileApiError> {
    let leaderboard = profile_service(&state)
        .leaderboard()
        .await
        .map_err(|e| ProfileApiError::internal(format!("Failed to load leaderboard: {}", e)))?;

    Ok(Json(json!({ "leaderboard": leaderboard })))
}
