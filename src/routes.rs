// src/routes.rs

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{results, session},
    state::AppState,
    utils::jwt::auth_middleware,
};

/// Assembles the main application router.
///
/// * Session routes: start, status, answers, violations, submit, persist retry, close.
/// * Exam results.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        axum::http::HeaderValue::from_static("http://localhost:3000"),
        axum::http::HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let session_routes = Router::new()
        .route("/", post(session::start_session))
        .route(
            "/{id}",
            get(session::get_status).delete(session::close_session),
        )
        .route("/{id}/answers", put(session::set_answer))
        .route("/{id}/violations", post(session::record_violation))
        .route("/{id}/submit", post(session::submit))
        .route("/{id}/persist", post(session::retry_persist));

    let exam_routes = Router::new().route("/{id}/submissions", get(results::list_submissions));

    Router::new()
        .nest("/api/sessions", session_routes)
        .nest("/api/exams", exam_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
