use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::api::handlers::source::AppState;
use crate::api::middleware::AppError;
use crate::models::{DslQuery, ExecutionResult};
use crate::services::QueryPlan;

/// Body of the query and compile endpoints
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub table: String,
    pub query: DslQuery,
}

/// Execute a DSL query. Always answers 200: failures, including a body
/// that is not a valid query, come back as `ok: false`.
pub async fn execute_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Json<ExecutionResult> {
    tracing::info!("Executing DSL query for source: {}", id);

    let request: QueryRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => return Json(ExecutionResult::failure(format!("Invalid query: {}", e))),
    };

    Json(
        state
            .query_service
            .execute(&id, &request.table, &request.query)
            .await,
    )
}

/// Compile without executing: SQL text, execution path and capability
pub async fn compile_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryPlan>, AppError> {
    let plan = state
        .query_service
        .explain(&id, &payload.table, &payload.query)
        .await?;

    tracing::debug!("Plan for source {}: {} -> {}", id, plan.path.as_str(), plan.sql);
    Ok(Json(plan))
}
