use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::api::middleware::AppError;
use crate::models::{DataSchema, Dialect};
use crate::services::sources::{create_source, DataSource};
use crate::storage::SqliteStorage;

/// A connected source with its lazily loaded schema
pub struct ConnectedSource {
    pub id: String,
    pub source: Arc<dyn DataSource>,
    schema: OnceCell<DataSchema>,
}

impl ConnectedSource {
    fn new(id: String, source: Arc<dyn DataSource>) -> Self {
        Self {
            id,
            source,
            schema: OnceCell::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.source.dialect()
    }

    /// Schema of the source, fetched once and cached
    pub async fn schema(&self) -> Result<&DataSchema, AppError> {
        self.schema
            .get_or_try_init(|| async {
                tracing::debug!("Loading schema for source {}", self.id);
                self.source.get_schema().await
            })
            .await
    }
}

/// Connection cache keyed by source id
/// Lookups only take the read lock, so concurrent queries against one source
/// share its connection without waiting on each other
pub struct SourceManager {
    sources: Arc<RwLock<HashMap<String, Arc<ConnectedSource>>>>,
    storage: Option<Arc<SqliteStorage>>,
    pool_max_size: usize,
}

impl SourceManager {
    /// Manager without a registry; sources must be attached
    pub fn new() -> Self {
        Self {
            sources: Arc::new(RwLock::new(HashMap::new())),
            storage: None,
            pool_max_size: 16,
        }
    }

    /// Manager that connects registered sources on first use
    pub fn with_storage(storage: Arc<SqliteStorage>, pool_max_size: usize) -> Self {
        Self {
            sources: Arc::new(RwLock::new(HashMap::new())),
            storage: Some(storage),
            pool_max_size,
        }
    }

    pub fn storage(&self) -> Option<&Arc<SqliteStorage>> {
        self.storage.as_ref()
    }

    /// Register an already connected source under `id`, replacing any previous one
    pub async fn attach(&self, id: impl Into<String>, source: Arc<dyn DataSource>) -> Arc<ConnectedSource> {
        let id = id.into();
        let connected = Arc::new(ConnectedSource::new(id.clone(), source));
        self.sources.write().await.insert(id, connected.clone());
        connected
    }

    /// Cached source, if connected
    pub async fn get(&self, id: &str) -> Option<Arc<ConnectedSource>> {
        self.sources.read().await.get(id).cloned()
    }

    /// Get the connected source, connecting it from the registry if needed.
    /// Safe to call concurrently from multiple tasks.
    pub async fn get_or_connect(&self, id: &str) -> Result<Arc<ConnectedSource>, AppError> {
        // Fast path: already connected (read lock)
        if let Some(source) = self.get(id).await {
            tracing::debug!("Using cached source {}", id);
            return Ok(source);
        }

        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| AppError::NotFound(format!("Source {} not found", id)))?;
        let definition = storage
            .get_source(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Source {} not found", id)))?;

        tracing::info!(
            "Connecting source {} ({}, {})",
            definition.name,
            definition.id,
            definition.source_type.as_str()
        );
        // Connect outside the lock so slow loads do not block other sources
        let source = create_source(&definition, self.pool_max_size).await?;

        // Slow path: insert (write lock), keeping a source another task
        // connected while we were loading
        let mut sources = self.sources.write().await;
        let connected = sources
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(ConnectedSource::new(id.to_string(), source)))
            .clone();
        Ok(connected)
    }

    /// Evict a source from the cache
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sources.write().await.remove(id).is_some();
        if removed {
            tracing::info!("Removed cached source {}", id);
        }
        removed
    }

    pub async fn source_count(&self) -> usize {
        self.sources.read().await.len()
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}
