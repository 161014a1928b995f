use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{query, source, AppState};
use crate::config::Config;
use crate::storage::SqliteStorage;

/// Create router with application state
pub fn create_router_with_state(storage: Arc<SqliteStorage>, config: &Config) -> Router {
    create_router(AppState::new(storage, config.pool.max_size))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/sources",
            get(source::list_sources).post(source::create_source),
        )
        .route(
            "/api/sources/{id}",
            get(source::get_source).delete(source::delete_source),
        )
        .route("/api/sources/{id}/schema", get(source::get_schema))
        .route("/api/sources/{id}/query", post(query::execute_query))
        .route("/api/sources/{id}/compile", post(query::compile_query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
