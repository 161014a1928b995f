// PostgreSQL connector using a deadpool connection pool
use std::error::Error as StdError;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use indexmap::IndexMap;
use serde_json::{json, Number, Value};
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::NoTls;
use url::Url;

use super::{mask_credentials, DataSource, QueryResult};
use crate::api::middleware::AppError;
use crate::models::{ColumnSchema, DataSchema, Dialect, ForeignKey, Row, TableSchema};

pub struct PostgresSource {
    pool: Pool,
}

impl PostgresSource {
    pub fn new(connection_url: &str, max_size: usize) -> Result<Self, AppError> {
        let url = Url::parse(connection_url)
            .map_err(|e| AppError::Configuration(format!("Invalid PostgreSQL URL: {}", e)))?;

        if url.scheme() != "postgresql" && url.scheme() != "postgres" {
            return Err(AppError::Configuration(
                "URL must use postgresql:// or postgres:// scheme".to_string(),
            ));
        }

        let mut cfg = PgConfig::new();
        cfg.url = Some(connection_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(max_size.max(1)));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Connection(format!("Failed to create connection pool: {}", e)))?;

        tracing::info!(
            "Created PostgreSQL pool for {} (max_size: {})",
            mask_credentials(connection_url),
            max_size
        );

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, AppError> {
        self.pool
            .get()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to get connection from pool: {}", e)))
    }
}

fn engine_error(e: tokio_postgres::Error) -> AppError {
    match e.as_db_error() {
        Some(db_error) => AppError::Engine(format!(
            "{} (SQLSTATE {})",
            db_error.message(),
            db_error.code().code()
        )),
        None => AppError::Engine(e.to_string()),
    }
}

#[async_trait::async_trait]
impl DataSource for PostgresSource {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, AppError> {
        let client = self.client().await?;
        let start = Instant::now();

        // Preparing first gives column names even for empty results
        let statement = client.prepare(sql).await.map_err(engine_error)?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let pg_rows = client.query(&statement, &[]).await.map_err(engine_error)?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let mut row = Row::new();
            for (idx, column) in pg_row.columns().iter().enumerate() {
                row.insert(column.name().to_string(), cell_to_json(pg_row, idx, column.type_()));
            }
            rows.push(row);
        }

        Ok(QueryResult::new(columns, rows, start.elapsed().as_millis() as u64))
    }

    async fn get_schema(&self) -> Result<DataSchema, AppError> {
        let client = self.client().await?;

        let column_rows = client
            .query(
                r#"
                SELECT table_name::text, column_name::text, data_type::text, is_nullable::text
                FROM information_schema.columns
                WHERE table_schema = current_schema()
                ORDER BY table_name, ordinal_position
                "#,
                &[],
            )
            .await
            .map_err(engine_error)?;

        let mut tables: IndexMap<String, Vec<ColumnSchema>> = IndexMap::new();
        for row in column_rows {
            let table: String = row.get(0);
            tables.entry(table).or_default().push(ColumnSchema {
                name: row.get(1),
                data_type: row.get(2),
                nullable: row.get::<_, String>(3) == "YES",
            });
        }

        let fk_rows = client
            .query(
                r#"
                SELECT tc.table_name::text, kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage ccu
                  ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
                WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema()
                "#,
                &[],
            )
            .await
            .map_err(engine_error)?;

        Ok(DataSchema {
            tables: tables
                .into_iter()
                .map(|(name, columns)| TableSchema { name, columns })
                .collect(),
            foreign_keys: fk_rows
                .iter()
                .map(|row| ForeignKey {
                    from_table: row.get(0),
                    from_column: row.get(1),
                    to_table: row.get(2),
                    to_column: row.get(3),
                })
                .collect(),
        })
    }

    async fn test_connection(&self) -> Result<(), AppError> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| AppError::Connection(e.to_string()))?;
        Ok(())
    }
}

/// NUMERIC decoded from the binary wire format into a float
#[derive(Debug, Clone, Copy, PartialEq)]
struct PgNumeric(f64);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let word = |i: usize| -> Result<[u8; 2], Box<dyn StdError + Sync + Send>> {
            raw.get(i..i + 2)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| "truncated NUMERIC value".into())
        };

        let ndigits = i16::from_be_bytes(word(0)?).max(0) as usize;
        let weight = i16::from_be_bytes(word(2)?) as i32;
        let sign = u16::from_be_bytes(word(4)?);
        if sign == NUMERIC_NAN {
            return Ok(PgNumeric(f64::NAN));
        }

        let mut value = 0.0;
        for i in 0..ndigits {
            let digit = i16::from_be_bytes(word(8 + 2 * i)?) as f64;
            value += digit * 10_000f64.powi(weight - i as i32);
        }
        Ok(PgNumeric(if sign == NUMERIC_NEG { -value } else { value }))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn cell_to_json(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T> {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let value = match *ty {
        Type::INT2 => get::<i16>(row, idx).map(|v| json!(v)),
        Type::INT4 => get::<i32>(row, idx).map(|v| json!(v)),
        Type::INT8 => get::<i64>(row, idx).map(|v| json!(v)),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| float(v as f64)),
        Type::FLOAT8 => get::<f64>(row, idx).map(float),
        Type::NUMERIC => get::<PgNumeric>(row, idx).map(|v| float(v.0)),
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::DATE => get::<NaiveDate>(row, idx).map(|d| json!(d.format("%Y-%m-%d").to_string())),
        Type::TIME => get::<NaiveTime>(row, idx).map(|t| json!(t.to_string())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(|t| json!(t.format("%Y-%m-%d %H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx).map(|t| json!(t.to_rfc3339())),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => {
                tracing::warn!("Unsupported column type {}, returning placeholder", ty.name());
                Some(json!(format!("<{}>", ty.name())))
            }
        },
    };
    value.unwrap_or(Value::Null)
}
