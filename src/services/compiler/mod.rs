// SQL Compiler
//
// Pure translation of a DSL query into dialect SQL. Queries with window
// fields compile in two phases: the non-window select list becomes a CTE
// (no ORDER BY / LIMIT inside it), window expressions read the CTE's
// columns, then the requested ORDER BY / LIMIT apply to the outer query.
//
// Aggregates without a native form in the target dialect render as a NULL
// placeholder. Callers learn that from the returned `Capability`, never by
// inspecting the SQL text.

pub mod dialect;
pub mod expr;

use crate::models::{
    output_name, Dialect, DslQuery, GroupByField, JoinType, SelectField, WindowField,
    WindowFunction,
};
use crate::services::capability::{aggregate_capability, Capability};

pub use dialect::{SqlDialect, SqlFeature};

/// Name of the CTE holding the pre-window rows
const BASE_CTE: &str = "dsl_base";

/// Alias of the derived table a row count reads from
const COUNT_SOURCE: &str = "dsl_count";

/// Placeholder rendered for an aggregate the dialect cannot compute
pub const UNSUPPORTED_PLACEHOLDER: &str = "NULL";

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Omit the LIMIT clause (raw fetches for the fallback engine)
    pub skip_limit: bool,
}

/// Compiled SQL plus whether the dialect can run every aggregate natively
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub sql: String,
    pub capability: Capability,
}

/// Compile a DSL query against `table` for `dialect`.
///
/// Never fails: unsupported combinations degrade to a best-effort fragment
/// and genuine SQL errors surface when the engine executes the text.
pub fn compile(table: &str, query: &DslQuery, dialect: Dialect, options: CompileOptions) -> CompiledSql {
    let compiler = Compiler::new(table, query, dialect);
    let sql = if query.windows().next().is_some() {
        compiler.windowed(options)
    } else {
        compiler.base(true, options.skip_limit)
    };

    tracing::debug!("Compiled DSL query for {} ({}): {}", table, dialect.as_str(), sql);

    CompiledSql {
        sql,
        capability: aggregate_capability(query, dialect),
    }
}

/// Statement counting every row `query` yields before the row cap
pub fn compile_count(table: &str, query: &DslQuery, dialect: Dialect) -> String {
    let uncapped = compile(table, query, dialect, CompileOptions { skip_limit: true });
    format!(
        "SELECT COUNT(*) AS total_rows FROM ({}) AS {}",
        uncapped.sql, COUNT_SOURCE
    )
}

struct Compiler<'a> {
    table: &'a str,
    query: &'a DslQuery,
    dialect: &'static dyn SqlDialect,
}

impl<'a> Compiler<'a> {
    fn new(table: &'a str, query: &'a DslQuery, dialect: Dialect) -> Self {
        Self {
            table,
            query,
            dialect: dialect.sql(),
        }
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    fn column(&self, field: &str) -> String {
        expr::column(self.dialect, field)
    }

    /// Grouping expression of a field: its bucket when bucketed
    fn group_expr(&self, group: &GroupByField) -> String {
        let col = self.column(group.field());
        match group.bucket() {
            Some(bucket) => self.dialect.bucket(bucket, &col),
            None => col,
        }
    }

    fn aggregate_expr(&self, name: &str) -> Option<String> {
        let agg = self.query.aggregate_for_alias(name)?;
        let input = self.column(&agg.field);
        Some(
            self.dialect
                .aggregate(agg, &input)
                .unwrap_or_else(|| UNSUPPORTED_PLACEHOLDER.to_string()),
        )
    }

    /// Expression that produces an output column. ORDER BY and HAVING use it
    /// instead of the alias because Postgres rejects aliases inside
    /// expressions there.
    fn output_expr(&self, name: &str) -> String {
        if let Some(sql) = self.aggregate_expr(name) {
            return sql;
        }

        let plain = self.query.base_select().find_map(|field| match field {
            SelectField::Field(f) if f == name || output_name(f) == name => Some(f.as_str()),
            _ => None,
        });
        let bucketed = self
            .query
            .implicit_bucket_fields()
            .into_iter()
            .find(|b| b.field == name || output_name(&b.field) == name)
            .map(|b| b.field.as_str());

        match plain.or(bucketed) {
            Some(field) => {
                let col = self.column(field);
                match self.query.bucket_of(field) {
                    Some(bucket) => self.dialect.bucket(bucket, &col),
                    None => col,
                }
            }
            None => self.column(name),
        }
    }

    fn select_list(&self) -> Vec<String> {
        let mut items: Vec<String> = self
            .query
            .implicit_bucket_fields()
            .into_iter()
            .map(|b| {
                format!(
                    "{} AS {}",
                    self.dialect.bucket(b.bucket, &self.column(&b.field)),
                    self.quote(&output_name(&b.field))
                )
            })
            .collect();

        for field in self.query.base_select() {
            let item = match field {
                SelectField::Field(f) => {
                    let col = self.column(f);
                    match self.query.bucket_of(f) {
                        Some(bucket) => format!(
                            "{} AS {}",
                            self.dialect.bucket(bucket, &col),
                            self.quote(&output_name(f))
                        ),
                        None if f.contains('.') => {
                            format!("{} AS {}", col, self.quote(&output_name(f)))
                        }
                        None => col,
                    }
                }
                SelectField::Aggregate(agg) => {
                    let sql = self
                        .dialect
                        .aggregate(agg, &self.column(&agg.field))
                        .unwrap_or_else(|| UNSUPPORTED_PLACEHOLDER.to_string());
                    format!("{} AS {}", sql, self.quote(&agg.alias))
                }
                SelectField::Window(_) => continue,
            };
            items.push(item);
        }

        items
    }

    fn from_clause(&self) -> String {
        let mut sql = format!("FROM {}", self.quote(self.table));

        for join in &self.query.join {
            let left = if join.on.left.contains('.') {
                self.column(&join.on.left)
            } else {
                format!("{}.{}", self.quote(self.table), self.quote(&join.on.left))
            };
            let right = if join.on.right.contains('.') {
                self.column(&join.on.right)
            } else {
                format!("{}.{}", self.quote(&join.table), self.quote(&join.on.right))
            };
            let kind = match join.join_type {
                JoinType::Inner => "INNER JOIN",
                JoinType::Left => "LEFT JOIN",
            };
            sql.push_str(&format!(
                " {} {} ON {} = {}",
                kind,
                self.quote(&join.table),
                left,
                right
            ));
        }

        sql
    }

    fn where_clause(&self) -> Option<String> {
        if self.query.filter.is_empty() {
            return None;
        }
        let predicates: Vec<String> = self
            .query
            .filter
            .iter()
            .map(|f| expr::predicate(self.dialect, &self.column(&f.field), f))
            .collect();
        Some(format!("WHERE {}", predicates.join(" AND ")))
    }

    fn group_by_clause(&self) -> Option<String> {
        if self.query.group_by.is_empty() {
            return None;
        }
        let exprs: Vec<String> = self
            .query
            .group_by
            .iter()
            .map(|g| self.group_expr(g))
            .collect();
        Some(format!("GROUP BY {}", exprs.join(", ")))
    }

    fn having_clause(&self) -> Option<String> {
        if self.query.having.is_empty() {
            return None;
        }
        let predicates: Vec<String> = self
            .query
            .having
            .iter()
            .map(|f| expr::predicate(self.dialect, &self.output_expr(&f.field), f))
            .collect();
        Some(format!("HAVING {}", predicates.join(" AND ")))
    }

    fn order_by_clause(&self, resolve: impl Fn(&str) -> String) -> Option<String> {
        if self.query.order_by.is_empty() {
            return None;
        }
        let terms: Vec<String> = self
            .query
            .order_by
            .iter()
            .map(|o| expr::order_term(self.dialect, &resolve(&o.field), o.direction))
            .collect();
        Some(format!("ORDER BY {}", terms.join(", ")))
    }

    fn limit_clause(&self, skip_limit: bool) -> Option<String> {
        if skip_limit {
            None
        } else {
            Some(format!("LIMIT {}", self.query.row_cap()))
        }
    }

    /// Non-window query. The window CTE body passes `order_and_limit = false`.
    fn base(&self, order_and_limit: bool, skip_limit: bool) -> String {
        let mut parts = vec![
            format!("SELECT {}", self.select_list().join(", ")),
            self.from_clause(),
        ];
        parts.extend(self.where_clause());
        parts.extend(self.group_by_clause());
        parts.extend(self.having_clause());
        if order_and_limit {
            parts.extend(self.order_by_clause(|field| self.output_expr(field)));
            parts.extend(self.limit_clause(skip_limit));
        }
        parts.join(" ")
    }

    fn base_column(&self, name: &str) -> String {
        format!("{}.{}", BASE_CTE, self.quote(&output_name(name)))
    }

    fn over_clause(&self, win: &WindowField, with_order: bool) -> String {
        let mut parts = Vec::new();
        if !win.partition_by.is_empty() {
            let cols: Vec<String> = win.partition_by.iter().map(|p| self.base_column(p)).collect();
            parts.push(format!("PARTITION BY {}", cols.join(", ")));
        }
        if with_order && !win.order_by.is_empty() {
            let terms: Vec<String> = win
                .order_by
                .iter()
                .map(|o| expr::order_term(self.dialect, &self.base_column(&o.field), o.direction))
                .collect();
            parts.push(format!("ORDER BY {}", terms.join(", ")));
        }
        parts.join(" ")
    }

    /// Window function call without its alias
    fn window_call(&self, win: &WindowField) -> String {
        let value = win
            .field
            .as_deref()
            .map(|f| self.base_column(f))
            .unwrap_or_else(|| "NULL".to_string());
        let over = self.over_clause(win, true);
        let running_frame = if over.is_empty() {
            "ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW".to_string()
        } else {
            format!("{} ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW", over)
        };

        match win.window {
            WindowFunction::Lag | WindowFunction::Lead => {
                let name = if win.window == WindowFunction::Lag { "LAG" } else { "LEAD" };
                match &win.default {
                    Some(default) => format!(
                        "{}({}, {}, {}) OVER ({})",
                        name,
                        value,
                        win.offset(),
                        expr::literal(self.dialect, default),
                        over
                    ),
                    None => format!("{}({}, {}) OVER ({})", name, value, win.offset(), over),
                }
            }
            WindowFunction::Rank => format!("RANK() OVER ({})", over),
            WindowFunction::DenseRank => format!("DENSE_RANK() OVER ({})", over),
            WindowFunction::RowNumber => format!("ROW_NUMBER() OVER ({})", over),
            WindowFunction::RunningSum => format!("SUM({}) OVER ({})", value, running_frame),
            WindowFunction::RunningAvg => format!("AVG({}) OVER ({})", value, running_frame),
            WindowFunction::PctOfTotal => {
                let numeric = self.dialect.numeric_cast(&value);
                format!(
                    "{} / NULLIF(SUM({}) OVER ({}), 0)",
                    numeric,
                    numeric,
                    self.over_clause(win, false)
                )
            }
        }
    }

    fn window_expr(&self, win: &WindowField) -> String {
        format!("{} AS {}", self.window_call(win), self.quote(&win.alias))
    }

    /// Outer ORDER BY target: window aliases are not columns of the CTE, so
    /// the call itself is repeated
    fn windowed_order_expr(&self, field: &str) -> String {
        match self.query.windows().find(|w| w.alias == field) {
            Some(win) => self.window_call(win),
            None => self.base_column(field),
        }
    }

    /// Window query: base rows in a CTE, window expressions over its columns
    fn windowed(&self, options: CompileOptions) -> String {
        let base = self.base(false, true);
        let windows: Vec<String> = self.query.windows().map(|w| self.window_expr(w)).collect();

        let mut parts = vec![
            format!("WITH {} AS ({})", BASE_CTE, base),
            format!("SELECT {}.*, {}", BASE_CTE, windows.join(", ")),
            format!("FROM {}", BASE_CTE),
        ];
        parts.extend(self.order_by_clause(|field| self.windowed_order_expr(field)));
        parts.extend(self.limit_clause(options.skip_limit));
        parts.join(" ")
    }
}
