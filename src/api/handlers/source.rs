use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{CreateSourceRequest, DataSchema, SourceDefinition, SourceType};
use crate::services::{QueryService, SourceManager};
use crate::storage::SqliteStorage;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SqliteStorage>,
    pub sources: Arc<SourceManager>,
    pub query_service: Arc<QueryService>,
}

impl AppState {
    pub fn new(storage: Arc<SqliteStorage>, pool_max_size: usize) -> Self {
        let sources = Arc::new(SourceManager::with_storage(storage.clone(), pool_max_size));
        Self {
            storage,
            query_service: Arc::new(QueryService::new(sources.clone())),
            sources,
        }
    }
}

/// List all registered sources
pub async fn list_sources(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let sources = state.storage.list_sources().await?;

    Ok(Json(serde_json::json!({
        "sources": sources
    })))
}

/// Register a source; it must connect and answer before it is kept
pub async fn create_source(
    State(state): State<AppState>,
    Json(payload): Json<CreateSourceRequest>,
) -> Result<(StatusCode, Json<SourceDefinition>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("Source name cannot be empty".to_string()));
    }
    if payload.location.trim().is_empty() {
        return Err(AppError::Validation("Source location cannot be empty".to_string()));
    }

    let source_type = SourceType::from_str(&payload.source_type)?;
    let definition = SourceDefinition::new(
        payload.name.trim().to_string(),
        source_type,
        payload.location.trim().to_string(),
    );
    state.storage.save_source(&definition).await?;

    let connected = async {
        let connected = state.sources.get_or_connect(&definition.id).await?;
        connected.source.test_connection().await
    }
    .await;

    if let Err(e) = connected {
        tracing::warn!("Source {} failed to connect: {}", definition.name, e);
        state.sources.remove(&definition.id).await;
        state.storage.delete_source(&definition.id).await?;
        return Err(e);
    }

    tracing::info!(
        "Registered source {} ({}) as {}",
        definition.name,
        source_type.as_str(),
        definition.id
    );
    Ok((StatusCode::CREATED, Json(definition)))
}

/// Get a source definition by ID
pub async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceDefinition>, AppError> {
    let source = state
        .storage
        .get_source(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Source {} not found", id)))?;

    Ok(Json(source))
}

/// Delete a source and drop its cached connection
pub async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = state.storage.delete_source(&id).await?;
    state.sources.remove(&id).await;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Source {} not found", id)))
    }
}

/// Tables, columns and foreign keys of a source
pub async fn get_schema(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataSchema>, AppError> {
    let connected = state.sources.get_or_connect(&id).await?;
    let schema = connected.schema().await?;
    Ok(Json(schema.clone()))
}
