// SQLite connector
//
// File sources open a fresh read-only connection per query on a blocking
// thread, so concurrent queries never wait on each other. In-memory sources
// (ingested CSV files, tests) share one connection behind a mutex.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Number, Value};
use tokio::sync::Mutex;

use super::{DataSource, QueryResult};
use crate::api::middleware::AppError;
use crate::models::{ColumnSchema, DataSchema, Dialect, ForeignKey, Row, TableSchema};

enum Backing {
    File(String),
    Memory(Arc<Mutex<Connection>>),
}

pub struct SqliteSource {
    backing: Backing,
}

impl SqliteSource {
    /// Source over an existing database file
    pub fn open(path: &str) -> Result<Self, AppError> {
        // Accept sqlite:./path and sqlite://path as well as bare paths
        let clean = path.trim_start_matches("sqlite:").trim_start_matches("//");
        if !Path::new(clean).is_file() {
            return Err(AppError::Connection(format!("SQLite database not found: {}", clean)));
        }
        Ok(Self {
            backing: Backing::File(clean.to_string()),
        })
    }

    /// Source over an already populated connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            backing: Backing::Memory(Arc::new(Mutex::new(conn))),
        }
    }

    /// Run `f` against a connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AppError> + Send + 'static,
    {
        let task = match &self.backing {
            Backing::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || {
                    let conn = Connection::open_with_flags(
                        &path,
                        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                    )
                    .map_err(|e| AppError::Connection(format!("Failed to open {}: {}", path, e)))?;
                    f(&conn)
                })
            }
            Backing::Memory(conn) => {
                let conn = conn.clone();
                tokio::task::spawn_blocking(move || {
                    let guard = conn.blocking_lock();
                    f(&guard)
                })
            }
        };

        task.await
            .map_err(|e| AppError::Internal(format!("SQLite task failed: {}", e)))?
    }
}

#[async_trait::async_trait]
impl DataSource for SqliteSource {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, AppError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| run_query(conn, &sql)).await
    }

    async fn get_schema(&self) -> Result<DataSchema, AppError> {
        self.with_connection(|conn| read_schema(conn).map_err(|e| AppError::Engine(e.to_string())))
            .await
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AppError::Connection(e.to_string()))
        })
        .await
    }
}

/// Execute one statement and convert every row to JSON
pub fn run_query(conn: &Connection, sql: &str) -> Result<QueryResult, AppError> {
    let start = Instant::now();
    let engine = |e: rusqlite::Error| AppError::Engine(e.to_string());

    let mut stmt = conn.prepare(sql).map_err(engine)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([]).map_err(engine)?;
    while let Some(row) = cursor.next().map_err(engine)? {
        let mut out = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(engine)?;
            out.insert(name.clone(), to_json(value));
        }
        rows.push(out);
    }

    Ok(QueryResult::new(columns, rows, start.elapsed().as_millis() as u64))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Tables, views, columns and foreign keys of a SQLite database
pub fn read_schema(conn: &Connection) -> rusqlite::Result<DataSchema> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut schema = DataSchema::default();
    for name in names {
        let quoted = name.replace('"', "\"\"");

        let mut columns_stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", quoted))?;
        let columns = columns_stmt
            .query_map([], |row| {
                Ok(ColumnSchema {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    nullable: row.get::<_, i64>(3)? == 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut fk_stmt = conn.prepare(&format!("PRAGMA foreign_key_list(\"{}\")", quoted))?;
        let foreign_keys = fk_stmt
            .query_map([], |row| {
                Ok(ForeignKey {
                    from_table: name.clone(),
                    from_column: row.get(3)?,
                    to_table: row.get(2)?,
                    to_column: row.get::<_, Option<String>>(4)?.unwrap_or_else(|| "rowid".to_string()),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        schema.foreign_keys.extend(foreign_keys);
        schema.tables.push(TableSchema { name, columns });
    }

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn memory_source() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id), amount REAL);
            INSERT INTO customers VALUES (1, 'Ada'), (2, 'Linus');
            INSERT INTO orders VALUES (10, 1, 9.5), (11, 2, NULL);
            "#,
        )
        .unwrap();
        SqliteSource::from_connection(conn)
    }

    #[tokio::test]
    async fn test_query_converts_types() {
        let source = memory_source();
        let result = source
            .execute_query("SELECT id, customer_id, amount FROM orders ORDER BY id")
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["id", "customer_id", "amount"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["amount"], json!(9.5));
        assert_eq!(result.rows[1]["amount"], Value::Null);
        assert_eq!(result.rows[1]["id"], json!(11));
    }

    #[tokio::test]
    async fn test_engine_errors_are_reported() {
        let source = memory_source();
        let err = source.execute_query("SELECT nope FROM orders").await.unwrap_err();
        assert!(matches!(err, AppError::Engine(ref m) if m.contains("no such column")));
    }

    #[tokio::test]
    async fn test_schema_includes_foreign_keys() {
        let source = memory_source();
        let schema = source.get_schema().await.unwrap();

        assert_eq!(schema.table_names(), vec!["customers", "orders"]);
        let customers = schema.table("customers").unwrap();
        assert_eq!(customers.columns[1].name, "name");
        assert!(!customers.columns[1].nullable);
        assert_eq!(schema.foreign_keys.len(), 1);
        assert_eq!(schema.foreign_keys[0].from_column, "customer_id");
        assert_eq!(schema.foreign_keys[0].to_table, "customers");
    }

    #[tokio::test]
    async fn test_file_source_is_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2);")
                .unwrap();
        }

        let source = SqliteSource::open(path.to_str().unwrap()).unwrap();
        source.test_connection().await.unwrap();
        let result = source.execute_query("SELECT SUM(x) AS s FROM t").await.unwrap();
        assert_eq!(result.rows[0]["s"], json!(3));
        assert!(source.execute_query("INSERT INTO t VALUES (3)").await.is_err());
    }

    #[test]
    fn test_missing_file_is_a_connection_error() {
        assert!(matches!(
            SqliteSource::open("/definitely/not/here.db"),
            Err(AppError::Connection(_))
        ));
    }
}
