#![allow(dead_code)]

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             script-src 'self' 'unsafe-inline'; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; \
             connect-src 'self'",
        ),
    );
    response
}

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any); // TODO: restrict to specific origins in production

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // API endpoints (mixed: catalog public, the rest behind JWT)
        .nest("/api/v1", api_routes(app_state.clone()))
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware)) // Apply CSP to all responses
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn api_routes(
    app_state: std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    // Badge catalog is not user-scoped, so it stays public
    let public_routes = Router::new().route(
        "/achievements",
        get(handlers::profile::list_achievements),
    );

    // Protected routes (require JWT)
    let protected_routes = Router::new()
        // Quiz management
        .route(
            "/quizzes",
            get(handlers::quizzes::list_quizzes).post(handlers::quizzes::create_quiz),
        )
        .route("/quizzes/{id}", get(handlers::quizzes::get_quiz))
        .route("/quizzes/{id}/take", get(handlers::quizzes::take_quiz))
        .route("/quiz/generate", post(handlers::quizzes::generate_quiz))
        // Attempt lifecycle
        .route("/quiz/start", post(handlers::attempts::start_attempt))
        .route("/quiz/submit", post(handlers::attempts::submit_attempt))
        .route("/quiz/attempts/{id}", get(handlers::attempts::get_attempt))
        .route("/quiz/history", get(handlers::attempts::attempt_history))
        // Gamification reads
        .route("/user/profile", get(handlers::profile::get_profile))
        .route(
            "/user/achievements",
            get(handlers::profile::user_achievements),
        )
        .route("/leaderboard", get(handlers::profile::leaderboard))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}
