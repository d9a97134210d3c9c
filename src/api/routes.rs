use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(crate::api::handlers::health::health))
        .route("/ingest", post(crate::api::handlers::rag::ingest))
        .route("/jobs", post(crate::api::handlers::rag::enqueue))
        .route("/query", post(crate::api::handlers::rag::query))
        .route("/documents", get(crate::api::handlers::rag::documents))
}

/// The full application: routes under `/api` with tracing, CORS and a body limit.
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", create_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
