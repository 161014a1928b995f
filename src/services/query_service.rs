use serde::Serialize;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{DataSchema, Dialect, DslQuery, ExecutionResult, Row};
use crate::services::capability::{Capability, ExecutionPath};
use crate::services::compiler::{compile, compile_count, CompileOptions};
use crate::services::fallback::{value, FallbackEngine};
use crate::services::source_manager::{ConnectedSource, SourceManager};
use crate::services::sources::{run_checked, DataSource, QueryResult};
use crate::validation::SchemaValidator;

/// What a query would run as, without running it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// Statement sent to the source; the raw fetch on fallback paths
    pub sql: String,
    pub path: ExecutionPath,
    pub capability: Capability,
}

/// Query orchestrator: resolve source, validate, choose path, execute, normalize
pub struct QueryService {
    sources: Arc<SourceManager>,
}

impl QueryService {
    pub fn new(sources: Arc<SourceManager>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &Arc<SourceManager> {
        &self.sources
    }

    /// Execute a DSL query against `table` of a source.
    ///
    /// Never fails: every error, including validation, becomes a result
    /// with `ok: false`.
    pub async fn execute(&self, source_id: &str, table: &str, query: &DslQuery) -> ExecutionResult {
        match self.try_execute(source_id, table, query).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Query on {}.{} failed: {}", source_id, table, e);
                e.into()
            }
        }
    }

    async fn try_execute(
        &self,
        source_id: &str,
        table: &str,
        query: &DslQuery,
    ) -> Result<ExecutionResult, AppError> {
        let connected = self.sources.get_or_connect(source_id).await?;
        let schema = Self::validated_schema(&connected, table, query).await?;

        let dialect = connected.dialect();
        let path = ExecutionPath::choose(query, dialect);
        tracing::info!(
            "Executing query on {}.{} via {} ({})",
            source_id,
            table,
            path.as_str(),
            dialect.as_str()
        );

        let source = connected.source.as_ref();
        let result = if path.is_fallback() {
            FallbackEngine::execute(source, table, query, dialect).await
        } else {
            Self::run_sql(source, table, query, dialect).await
        };

        result.map_err(|e| enrich_engine_error(e, schema, table))
    }

    /// Run the capped statement. A result that fills the cap is counted in
    /// full so `totalRows` is the pre-truncation count on every path.
    async fn run_sql(
        source: &dyn DataSource,
        table: &str,
        query: &DslQuery,
        dialect: Dialect,
    ) -> Result<ExecutionResult, AppError> {
        let compiled = compile(table, query, dialect, CompileOptions::default());
        tracing::debug!("Compiled SQL: {}", compiled.sql);
        let fetched = run_checked(source, &compiled.sql).await?;

        let returned = fetched.rows.len();
        let total_rows = if returned < query.row_cap() as usize {
            returned
        } else {
            let counted = run_checked(source, &compile_count(table, query, dialect)).await?;
            let total = counted
                .rows
                .first()
                .and_then(|row| row.values().next())
                .and_then(value::as_number)
                .map(|n| n as usize)
                .unwrap_or(returned);
            tracing::debug!("Result fills the row cap; {} rows in total", total);
            total.max(returned)
        };

        Ok(normalize(fetched, query, total_rows))
    }

    /// Validate and compile without executing
    pub async fn explain(
        &self,
        source_id: &str,
        table: &str,
        query: &DslQuery,
    ) -> Result<QueryPlan, AppError> {
        let connected = self.sources.get_or_connect(source_id).await?;
        Self::validated_schema(&connected, table, query).await?;
        Ok(Self::plan(table, query, connected.dialect()))
    }

    /// Compiled statement, path and capability of `query` in `dialect`
    pub fn plan(table: &str, query: &DslQuery, dialect: Dialect) -> QueryPlan {
        let path = ExecutionPath::choose(query, dialect);
        let compiled = compile(table, query, dialect, CompileOptions::default());
        let sql = if path.is_fallback() {
            compile(
                table,
                &FallbackEngine::raw_query(query),
                dialect,
                CompileOptions { skip_limit: true },
            )
            .sql
        } else {
            compiled.sql
        };

        QueryPlan {
            sql,
            path,
            capability: compiled.capability,
        }
    }

    async fn validated_schema<'s>(
        connected: &'s ConnectedSource,
        table: &str,
        query: &DslQuery,
    ) -> Result<&'s DataSchema, AppError> {
        let schema = connected.schema().await?;
        match schema.table(table) {
            Some(table_schema) if query.join.is_empty() => {
                SchemaValidator::validate(table_schema, query)?
            }
            _ => SchemaValidator::validate_with_joins(schema, table, query)?,
        }
        Ok(schema)
    }
}

/// SQL path result in the shape the fallback engine produces
fn normalize(fetched: QueryResult, query: &DslQuery, total_rows: usize) -> ExecutionResult {
    let columns = query.output_columns();
    let cap = query.row_cap() as usize;

    let rows: Vec<Row> = fetched
        .rows
        .into_iter()
        .take(cap)
        .map(|row| value::project_row(row, &columns))
        .collect();

    ExecutionResult::success(rows, columns, total_rows, total_rows > cap)
}

/// Append the names that do exist when the engine reports a missing table or column
fn enrich_engine_error(err: AppError, schema: &DataSchema, table: &str) -> AppError {
    let AppError::Engine(message) = err else {
        return err;
    };
    let lower = message.to_lowercase();

    let missing_table = lower.contains("no such table")
        || lower.contains("doesn't exist")
        || (lower.contains("relation") && lower.contains("does not exist"));
    let missing_column = lower.contains("no such column")
        || lower.contains("unknown column")
        || (lower.contains("column") && lower.contains("does not exist"));

    if missing_table {
        AppError::Engine(format!(
            "{}. Available tables: {}",
            message,
            schema.table_names().join(", ")
        ))
    } else if missing_column {
        match schema.table(table) {
            Some(t) => AppError::Engine(format!(
                "{}. Available columns in {}: {}",
                message,
                table,
                t.column_names().join(", ")
            )),
            None => AppError::Engine(message),
        }
    } else {
        AppError::Engine(message)
    }
}
