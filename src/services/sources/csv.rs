// CSV connector
//
// The file is ingested once into an in-memory SQLite table named after the
// file stem; queries then run as SQLite. Column types are inferred from the
// data: INTEGER when every non-empty cell parses as an integer, REAL when
// every cell parses as a number, TEXT otherwise. Empty cells load as NULL.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use super::sqlite::SqliteSource;
use super::{DataSource, QueryResult};
use crate::api::middleware::AppError;
use crate::models::{DataSchema, Dialect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut kind = ColumnType::Integer;
        for cell in cells.map(str::trim).filter(|c| !c.is_empty()) {
            if kind == ColumnType::Integer && cell.parse::<i64>().is_err() {
                kind = ColumnType::Real;
            }
            if kind == ColumnType::Real && cell.parse::<f64>().is_err() {
                return ColumnType::Text;
            }
        }
        kind
    }

    fn convert(&self, cell: &str) -> SqlValue {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return SqlValue::Null;
        }
        match self {
            ColumnType::Integer => trimmed.parse().map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            ColumnType::Real => trimmed.parse().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            ColumnType::Text => SqlValue::Text(cell.to_string()),
        }
    }
}

pub struct CsvSource {
    path: PathBuf,
    table: String,
    inner: SqliteSource,
}

impl CsvSource {
    /// Read and ingest a CSV file
    pub async fn load(path: &str) -> Result<Self, AppError> {
        let path = PathBuf::from(path);
        let table = table_name(&path);

        let (conn, rows) = {
            let path = path.clone();
            let table = table.clone();
            tokio::task::spawn_blocking(move || ingest(&path, &table))
                .await
                .map_err(|e| AppError::Internal(format!("CSV ingestion task failed: {}", e)))?
                .map_err(|e| AppError::Connection(format!("{:#}", e)))?
        };

        tracing::info!("Loaded {} rows from {} into table {}", rows, path.display(), table);

        Ok(Self {
            path,
            table,
            inner: SqliteSource::from_connection(conn),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl DataSource for CsvSource {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, AppError> {
        self.inner.execute_query(sql).await
    }

    async fn get_schema(&self) -> Result<DataSchema, AppError> {
        self.inner.get_schema().await
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        self.inner.test_connection().await
    }
}

/// Table name derived from the file stem, restricted to word characters
fn table_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "data".to_string()
    } else {
        name
    }
}

/// Unique, non-empty header names
fn column_names(headers: &csv::StringRecord) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let base = match header.trim() {
            "" => format!("column_{}", idx + 1),
            trimmed => trimmed.to_string(),
        };
        let mut name = base.clone();
        let mut suffix = 2;
        while names.contains(&name) {
            name = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        names.push(name);
    }
    names
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn ingest(path: &Path, table: &str) -> anyhow::Result<(Connection, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header of {}", path.display()))?
        .clone();
    let columns = column_names(&headers);

    let records: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .with_context(|| format!("Malformed CSV record in {}", path.display()))?;

    let types: Vec<ColumnType> = (0..columns.len())
        .map(|idx| ColumnType::infer(records.iter().filter_map(|r| r.get(idx))))
        .collect();

    let mut conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
    let definition = columns
        .iter()
        .zip(&types)
        .map(|(name, kind)| format!("{} {}", quote(name), kind.sql()))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(&format!("CREATE TABLE {} ({})", quote(table), definition), [])
        .context("Failed to create table for CSV data")?;

    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = format!("INSERT INTO {} VALUES ({})", quote(table), placeholders);
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&insert)?;
        for record in &records {
            let values = types
                .iter()
                .enumerate()
                .map(|(idx, kind)| record.get(idx).map(|cell| kind.convert(cell)).unwrap_or(SqlValue::Null));
            stmt.execute(rusqlite::params_from_iter(values))?;
        }
    }
    tx.commit()?;

    Ok((conn, records.len()))
}
