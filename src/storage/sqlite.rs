use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{SourceDefinition, SourceType};

/// SQLite registry of data sources
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the registry database
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory registry, used by tests and embedded setups
    pub async fn in_memory() -> SqliteResult<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                source_type TEXT NOT NULL,
                location TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sources_created ON sources(created_at DESC)",
            [],
        )?;

        Ok(())
    }

    /// Save (insert or replace) a source definition
    pub async fn save_source(&self, source: &SourceDefinition) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO sources (id, name, source_type, location, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            rusqlite::params![
                source.id,
                source.name,
                source.source_type.as_str(),
                source.location,
                source.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a source by ID
    pub async fn get_source(&self, id: &str) -> SqliteResult<Option<SourceDefinition>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, source_type, location, created_at FROM sources WHERE id = ?1",
        )?;

        match stmt.query_row(rusqlite::params![id], Self::row_to_source) {
            Ok(source) => Ok(Some(source)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List all sources, newest first
    pub async fn list_sources(&self) -> SqliteResult<Vec<SourceDefinition>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, source_type, location, created_at FROM sources ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], Self::row_to_source)?;
        rows.collect()
    }

    /// Delete a source; true when a row was removed
    pub async fn delete_source(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute("DELETE FROM sources WHERE id = ?1", rusqlite::params![id])?;
        Ok(rows_affected > 0)
    }

    fn row_to_source(row: &rusqlite::Row<'_>) -> SqliteResult<SourceDefinition> {
        let source_type: String = row.get(2)?;
        let created_at: String = row.get(4)?;

        Ok(SourceDefinition {
            id: row.get(0)?,
            name: row.get(1)?,
            source_type: SourceType::from_str(&source_type).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?,
            location: row.get(3)?,
            created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
                })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sqlite_storage_creation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let storage = rt.block_on(async { SqliteStorage::new(&db_path).await });
        assert!(storage.is_ok());
    }

    #[test]
    fn test_sqlite_url_prefix_is_accepted() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("prefixed.db").display());
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async { SqliteStorage::new(&url).await.unwrap() });
        assert!(dir.path().join("prefixed.db").exists());
    }

    #[tokio::test]
    async fn test_source_crud_operations() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let csv = SourceDefinition::new("Sales".into(), SourceType::Csv, "/data/sales.csv".into());
        let pg = SourceDefinition::new(
            "Warehouse".into(),
            SourceType::Postgres,
            "postgresql://localhost/wh".into(),
        );
        storage.save_source(&csv).await.unwrap();
        storage.save_source(&pg).await.unwrap();

        let loaded = storage.get_source(&csv.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Sales");
        assert_eq!(loaded.source_type, SourceType::Csv);
        assert_eq!(loaded.location, "/data/sales.csv");
        assert_eq!(loaded.created_at.timestamp(), csv.created_at.timestamp());

        assert_eq!(storage.list_sources().await.unwrap().len(), 2);

        assert!(storage.delete_source(&csv.id).await.unwrap());
        assert!(!storage.delete_source(&csv.id).await.unwrap());
        assert!(storage.get_source(&csv.id).await.unwrap().is_none());
        assert_eq!(storage.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_existing_source() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let mut source = SourceDefinition::new("a".into(), SourceType::Sqlite, "/a.db".into());
        storage.save_source(&source).await.unwrap();

        source.location = "/b.db".to_string();
        storage.save_source(&source).await.unwrap();

        let sources = storage.list_sources().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].location, "/b.db");
    }
}
