// MySQL connector using the mysql_async pool
use std::time::Instant;

use indexmap::IndexMap;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, Value as MySqlValue};
use serde_json::{json, Number, Value};
use url::Url;

use super::{mask_credentials, DataSource, QueryResult};
use crate::api::middleware::AppError;
use crate::models::{ColumnSchema, DataSchema, Dialect, ForeignKey, Row, TableSchema};

pub struct MySqlSource {
    pool: Pool,
}

impl MySqlSource {
    pub fn new(connection_url: &str, max_size: usize) -> Result<Self, AppError> {
        let url = Url::parse(connection_url)
            .map_err(|e| AppError::Configuration(format!("Invalid MySQL URL: {}", e)))?;

        if url.scheme() != "mysql" && url.scheme() != "mariadb" {
            return Err(AppError::Configuration(
                "URL must use mysql:// or mariadb:// scheme".to_string(),
            ));
        }

        // mysql_async only understands the mysql:// scheme
        let normalized = connection_url.replacen("mariadb://", "mysql://", 1);
        let opts = Opts::from_url(&normalized)
            .map_err(|e| AppError::Configuration(format!("Invalid MySQL URL: {}", e)))?;
        let constraints = PoolConstraints::new(0, max_size.max(1)).unwrap_or_default();
        let opts = OptsBuilder::from_opts(opts).pool_opts(PoolOpts::default().with_constraints(constraints));

        tracing::info!(
            "Created MySQL pool for {} (max_size: {})",
            mask_credentials(connection_url),
            max_size
        );

        Ok(Self {
            pool: Pool::new(opts),
        })
    }

    async fn conn(&self) -> Result<Conn, AppError> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get MySQL connection from pool: {}", e)))
    }
}

#[async_trait::async_trait]
impl DataSource for MySqlSource {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, AppError> {
        let mut conn = self.conn().await?;
        let start = Instant::now();

        let mut result = conn
            .query_iter(sql)
            .await
            .map_err(|e| AppError::Engine(e.to_string()))?;
        let columns = result.columns_ref().to_vec();
        let raw_rows: Vec<mysql_async::Row> = result
            .collect()
            .await
            .map_err(|e| AppError::Engine(e.to_string()))?;

        let names: Vec<String> = columns.iter().map(|c| c.name_str().into_owned()).collect();
        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            let mut row = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = raw
                    .as_ref(idx)
                    .map(|v| to_json(v, column.column_type()))
                    .unwrap_or(Value::Null);
                row.insert(names[idx].clone(), value);
            }
            rows.push(row);
        }

        Ok(QueryResult::new(names, rows, start.elapsed().as_millis() as u64))
    }

    async fn get_schema(&self) -> Result<DataSchema, AppError> {
        let mut conn = self.conn().await?;
        let schema_error = |e: mysql_async::Error| AppError::Engine(format!("Failed to read schema: {}", e));

        let column_rows: Vec<(String, String, String, String)> = conn
            .query(
                r#"
                SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, IS_NULLABLE
                FROM information_schema.COLUMNS
                WHERE TABLE_SCHEMA = DATABASE()
                ORDER BY TABLE_NAME, ORDINAL_POSITION
                "#,
            )
            .await
            .map_err(schema_error)?;

        let mut tables: IndexMap<String, Vec<ColumnSchema>> = IndexMap::new();
        for (table, name, data_type, nullable) in column_rows {
            tables.entry(table).or_default().push(ColumnSchema {
                name,
                data_type,
                nullable: nullable == "YES",
            });
        }

        let fk_rows: Vec<(String, String, String, String)> = conn
            .query(
                r#"
                SELECT TABLE_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME
                FROM information_schema.KEY_COLUMN_USAGE
                WHERE TABLE_SCHEMA = DATABASE() AND REFERENCED_TABLE_NAME IS NOT NULL
                "#,
            )
            .await
            .map_err(schema_error)?;

        Ok(DataSchema {
            tables: tables
                .into_iter()
                .map(|(name, columns)| TableSchema { name, columns })
                .collect(),
            foreign_keys: fk_rows
                .into_iter()
                .map(|(from_table, from_column, to_table, to_column)| ForeignKey {
                    from_table,
                    from_column,
                    to_table,
                    to_column,
                })
                .collect(),
        })
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        conn.ping()
            .await
            .map_err(|e| AppError::Connection(e.to_string()))
    }
}

/// Convert a MySQL value to JSON. The text protocol sends every value as
/// bytes, so the column type decides how they are read.
fn to_json(value: &MySqlValue, column_type: ColumnType) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match column_type {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_YEAR => text
                    .parse::<i64>()
                    .map(Value::from)
                    .or_else(|_| text.parse::<u64>().map(Value::from))
                    .unwrap_or(Value::String(text)),
                ColumnType::MYSQL_TYPE_DECIMAL
                | ColumnType::MYSQL_TYPE_NEWDECIMAL
                | ColumnType::MYSQL_TYPE_FLOAT
                | ColumnType::MYSQL_TYPE_DOUBLE => text
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::String(text)),
                _ => Value::String(text),
            }
        }
        MySqlValue::Int(i) => json!(i),
        MySqlValue::UInt(u) => json!(u),
        MySqlValue::Float(f) => Number::from_f64(*f as f64).map(Value::Number).unwrap_or(Value::Null),
        MySqlValue::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
        MySqlValue::Date(y, m, d, 0, 0, 0, 0) => json!(format!("{:04}-{:02}-{:02}", y, m, d)),
        MySqlValue::Date(y, m, d, h, min, s, _) => {
            json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
        }
        MySqlValue::Time(is_neg, d, h, m, s, _) => {
            let sign = if *is_neg { "-" } else { "" };
            let total_hours = d * 24 + *h as u32;
            json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_protocol_values_follow_column_type() {
        let bytes = |s: &str| MySqlValue::Bytes(s.as_bytes().to_vec());

        assert_eq!(to_json(&bytes("42"), ColumnType::MYSQL_TYPE_LONGLONG), json!(42));
        assert_eq!(to_json(&bytes("12.50"), ColumnType::MYSQL_TYPE_NEWDECIMAL), json!(12.5));
        assert_eq!(to_json(&bytes("2024-01-01"), ColumnType::MYSQL_TYPE_VAR_STRING), json!("2024-01-01"));
        assert_eq!(to_json(&MySqlValue::NULL, ColumnType::MYSQL_TYPE_LONG), Value::Null);
    }

    #[test]
    fn test_binary_protocol_dates() {
        assert_eq!(
            to_json(&MySqlValue::Date(2024, 3, 5, 0, 0, 0, 0), ColumnType::MYSQL_TYPE_DATE),
            json!("2024-03-05")
        );
        assert_eq!(
            to_json(&MySqlValue::Date(2024, 3, 5, 13, 4, 5, 0), ColumnType::MYSQL_TYPE_DATETIME),
            json!("2024-03-05 13:04:05")
        );
    }

    #[tokio::test]
    async fn test_url_validation() {
        assert!(matches!(
            MySqlSource::new("postgres://localhost/db", 4),
            Err(AppError::Configuration(_))
        ));
        assert!(MySqlSource::new("mysql://root:pw@localhost:3306/app", 4).is_ok());
    }
}
