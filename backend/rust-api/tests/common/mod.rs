use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use quizai_api::{
    config::{Config, GenerationConfig},
    create_router,
    middlewares::auth::JwtClaims,
    models::Achievement,
    services::AppState,
};

/// Router over in-memory stores, plus the state handle for direct seeding
/// and assertions against the stores.
pub async fn create_test_app() -> (Router, Arc<AppState>) {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let state = Arc::new(AppState::in_memory(test_config()));

    // Same catalog the server seeds at startup
    for achievement in Achievement::standard_catalog() {
        state
            .achievements
            .upsert_by_title(&achievement)
            .await
            .expect("Failed to seed achievement catalog");
    }

    (create_router(state.clone()), state)
}

fn test_config() -> Config {
    Config {
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_database: "quizai_test".to_string(),
        redis_uri: None,
        jwt_secret: "test-secret".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        generation: GenerationConfig {
            // Discard port: generation attempts fail fast instead of
            // reaching a live model during tests.
            ollama_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_millis(250),
            ..GenerationConfig::default()
        },
    }
}

/// Bearer token accepted by the test router's auth middleware.
pub fn auth_token(state: &AppState, user_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    state
        .jwt
        .generate_token(JwtClaims {
            sub: user_id.to_string(),
            exp: (now + 3600) as usize,
            iat: now as usize,
        })
        .expect("Failed to generate test token")
}
