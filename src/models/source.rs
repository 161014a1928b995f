use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::AppError;

/// SQL dialect a source speaks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            _ => Err(AppError::Configuration(format!(
                "Unsupported dialect: {}. Supported dialects: sqlite, postgres, mysql",
                s
            ))),
        }
    }
}

/// Kind of connector backing a source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Csv,
    Sqlite,
    Postgres,
    Mysql,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Csv => "csv",
            SourceType::Sqlite => "sqlite",
            SourceType::Postgres => "postgres",
            SourceType::Mysql => "mysql",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(SourceType::Csv),
            "sqlite" | "sqlite3" => Ok(SourceType::Sqlite),
            "postgres" | "postgresql" => Ok(SourceType::Postgres),
            "mysql" | "mariadb" => Ok(SourceType::Mysql),
            _ => Err(AppError::Configuration(format!(
                "Unsupported source type: {}. Supported types: csv, sqlite, postgres, mysql",
                s
            ))),
        }
    }

    /// CSV files are ingested into SQLite, so they share its dialect
    pub fn dialect(&self) -> Dialect {
        match self {
            SourceType::Csv | SourceType::Sqlite => Dialect::Sqlite,
            SourceType::Postgres => Dialect::Postgres,
            SourceType::Mysql => Dialect::Mysql,
        }
    }
}

/// A registered data source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDefinition {
    pub id: String,
    pub name: String,
    pub source_type: SourceType,
    /// File path for csv/sqlite, connection URL for postgres/mysql
    pub location: String,
    pub created_at: DateTime<Utc>,
}

impl SourceDefinition {
    pub fn new(name: String, source_type: SourceType, location: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            source_type,
            location,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSourceRequest {
    pub name: String,
    pub source_type: String,
    pub location: String,
}
