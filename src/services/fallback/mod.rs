// Fallback Aggregation Engine
//
// Used when a dialect cannot compute some requested aggregate. Fetches the
// filtered raw rows with one compiled statement, then groups, aggregates,
// filters (HAVING), applies windows, orders and truncates in process.

pub mod aggregate;
pub mod having;
pub mod value;
pub mod window;

use indexmap::IndexMap;
use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::{
    output_name, Dialect, DslQuery, ExecutionResult, Row, SelectField,
};
use crate::services::compiler::{compile, CompileOptions};
use crate::services::sources::{run_checked, DataSource};

pub struct FallbackEngine;

impl FallbackEngine {
    /// Run `query` through the interpreter. Never fails; an engine error
    /// during the raw fetch becomes a failed result.
    pub async fn run(
        source: &dyn DataSource,
        table: &str,
        query: &DslQuery,
        dialect: Dialect,
    ) -> ExecutionResult {
        Self::execute(source, table, query, dialect)
            .await
            .unwrap_or_else(ExecutionResult::from)
    }

    /// Same as `run` but hands engine errors back to the caller
    pub async fn execute(
        source: &dyn DataSource,
        table: &str,
        query: &DslQuery,
        dialect: Dialect,
    ) -> Result<ExecutionResult, AppError> {
        let raw = Self::raw_query(query);
        let compiled = compile(table, &raw, dialect, CompileOptions { skip_limit: true });
        tracing::debug!("Fallback raw fetch: {}", compiled.sql);

        let fetched = run_checked(source, &compiled.sql).await?;
        tracing::debug!(
            "Fallback fetched {} raw rows in {}ms",
            fetched.rows.len(),
            fetched.execution_time_ms
        );

        let rows = Self::interpret(fetched.rows, query);
        Ok(Self::finalize(rows, query))
    }

    /// Filters-only query selecting the raw fields every later stage reads
    pub fn raw_query(query: &DslQuery) -> DslQuery {
        let mut fields: Vec<String> = Vec::new();
        let mut add = |field: &str| {
            if field != "*" && !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        };

        for field in query.base_select() {
            match field {
                SelectField::Field(name) => add(name),
                SelectField::Aggregate(agg) => add(&agg.field),
                SelectField::Window(_) => {}
            }
        }
        for group in &query.group_by {
            add(group.field());
        }
        if fields.is_empty() {
            fields.push("*".to_string());
        }

        DslQuery {
            join: query.join.clone(),
            select: fields.into_iter().map(SelectField::Field).collect(),
            filter: query.filter.clone(),
            ..DslQuery::default()
        }
    }

    /// Group, aggregate, HAVING and windows over the raw rows
    pub fn interpret(raw: Vec<Row>, query: &DslQuery) -> Vec<Row> {
        let mut rows = if !query.has_aggregates() && query.group_by.is_empty() {
            raw
        } else {
            having::apply(Self::aggregate(&raw, query), &query.having)
        };
        window::apply(&mut rows, query.windows());
        rows
    }

    /// One output row per group, columns in base output order
    fn aggregate(raw: &[Row], query: &DslQuery) -> Vec<Row> {
        // Group key values per group-by field, bucketed where requested
        let key_values = |row: &Row| -> Vec<Value> {
            query
                .group_by
                .iter()
                .map(|group| {
                    let cell = row.get(&output_name(group.field())).cloned().unwrap_or(Value::Null);
                    match group.bucket() {
                        Some(bucket) if !cell.is_null() => value::bucket(&cell, bucket),
                        _ => cell,
                    }
                })
                .collect()
        };

        let mut groups: IndexMap<String, (Vec<Value>, Vec<&Row>)> = IndexMap::new();
        if query.group_by.is_empty() {
            // One implicit group, present even when no rows matched
            groups.insert(String::new(), (Vec::new(), raw.iter().collect()));
        } else {
            for row in raw {
                let keys = key_values(row);
                let key = value::group_key(keys.iter().map(Some));
                groups
                    .entry(key)
                    .or_insert_with(|| (keys, Vec::new()))
                    .1
                    .push(row);
            }
        }

        let key_of = |keys: &[Value], field: &str| -> Option<Value> {
            query
                .group_by
                .iter()
                .position(|group| group.field() == field)
                .map(|i| keys[i].clone())
        };

        groups
            .into_values()
            .map(|(keys, members)| {
                let mut out = Row::new();
                for bucketed in query.implicit_bucket_fields() {
                    out.insert(
                        output_name(&bucketed.field),
                        key_of(&keys, &bucketed.field).unwrap_or(Value::Null),
                    );
                }
                for field in query.base_select() {
                    match field {
                        SelectField::Field(name) => {
                            let column = output_name(name);
                            let cell = key_of(&keys, name).unwrap_or_else(|| {
                                members
                                    .first()
                                    .and_then(|row| row.get(&column).cloned())
                                    .unwrap_or(Value::Null)
                            });
                            out.insert(column, cell);
                        }
                        SelectField::Aggregate(agg) => {
                            out.insert(agg.alias.clone(), aggregate::compute(agg, &members));
                        }
                        SelectField::Window(_) => {}
                    }
                }
                out
            })
            .collect()
    }

    /// Outer ordering and truncation to the row cap
    pub fn finalize(mut rows: Vec<Row>, query: &DslQuery) -> ExecutionResult {
        window::sort_rows(&mut rows, &query.order_by);

        let total_rows = rows.len();
        let cap = query.row_cap() as usize;
        let truncated = total_rows > cap;
        rows.truncate(cap);

        let columns = query.output_columns();
        let rows = rows
            .into_iter()
            .map(|row| value::project_row(row, &columns))
            .collect();
        ExecutionResult::success(rows, columns, total_rows, truncated)
    }
}
