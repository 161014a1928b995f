use std::collections::HashSet;

use crate::api::middleware::AppError;
use crate::models::{output_name, Aggregate, DataSchema, DslQuery, SelectField, TableSchema};

/// Checks a DSL query against the schema of its source before anything runs.
/// Errors name the offending identifier and, where one exists, the closest
/// valid name.
pub struct SchemaValidator;

/// Tables a query can read: the base table and its joins, in join order
struct Scope<'a> {
    tables: Vec<&'a TableSchema>,
}

impl<'a> Scope<'a> {
    fn base(&self) -> &'a TableSchema {
        self.tables[0]
    }

    fn table(&self, name: &str) -> Option<&'a TableSchema> {
        self.tables.iter().copied().find(|t| t.name == name)
    }

    /// Resolve `column` or `table.column` against the scope
    fn resolve(&self, field: &str, context: &str) -> Result<(), AppError> {
        match field.split_once('.') {
            Some((table_name, column)) => {
                let table = self.table(table_name).ok_or_else(|| {
                    let names: Vec<&str> = self.tables.iter().map(|t| t.name.as_str()).collect();
                    AppError::Validation(format!(
                        "Unknown table '{}' in {} '{}'.{}",
                        table_name,
                        context,
                        field,
                        suggestion(table_name, names)
                    ))
                })?;
                check_column(table, column, context)
            }
            None => {
                if self.tables.iter().any(|t| t.has_column(field)) {
                    return Ok(());
                }
                let candidates = self.tables.iter().flat_map(|t| t.column_names());
                Err(AppError::Validation(format!(
                    "Unknown {} '{}' in table '{}'.{}",
                    context,
                    field,
                    self.base().name,
                    suggestion(field, candidates)
                )))
            }
        }
    }
}

fn check_column(table: &TableSchema, column: &str, context: &str) -> Result<(), AppError> {
    if table.has_column(column) {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "Unknown {} '{}' in table '{}'.{}",
        context,
        column,
        table.name,
        suggestion(column, table.column_names())
    )))
}

impl SchemaValidator {
    /// Validate a query that reads a single table
    pub fn validate(table: &TableSchema, query: &DslQuery) -> Result<(), AppError> {
        if !query.join.is_empty() {
            return Err(AppError::Validation(
                "Joins need the full source schema; use validate_with_joins".to_string(),
            ));
        }
        Self::check(&Scope { tables: vec![table] }, query)
    }

    /// Validate a query against the whole source schema, resolving joins
    pub fn validate_with_joins(
        schema: &DataSchema,
        base_table: &str,
        query: &DslQuery,
    ) -> Result<(), AppError> {
        let base = schema.table(base_table).ok_or_else(|| {
            AppError::Validation(format!(
                "Unknown table '{}'.{}",
                base_table,
                suggestion(base_table, schema.table_names())
            ))
        })?;

        let mut scope = Scope { tables: vec![base] };
        for join in &query.join {
            let joined = schema.table(&join.table).ok_or_else(|| {
                AppError::Validation(format!(
                    "Unknown join table '{}'.{}",
                    join.table,
                    suggestion(&join.table, schema.table_names())
                ))
            })?;

            // Unqualified keys bind to the base table on the left and the
            // joined table on the right
            let keys = [(&join.on.left, base), (&join.on.right, joined)];
            for (key, default_table) in keys {
                let checked = if key.contains('.') {
                    let mut with_joined = scope.tables.clone();
                    with_joined.push(joined);
                    Scope { tables: with_joined }.resolve(key, "join key")
                } else {
                    check_column(default_table, key, "join key")
                };
                checked.map_err(|e| with_join_hint(e, schema, &base.name, &joined.name))?;
            }
            scope.tables.push(joined);
        }

        Self::check(&scope, query)
    }

    fn check(scope: &Scope<'_>, query: &DslQuery) -> Result<(), AppError> {
        if query.select.is_empty() {
            return Err(AppError::Validation("Query must select at least one field".to_string()));
        }

        for field in &query.select {
            match field {
                SelectField::Field(name) => scope.resolve(name, "field")?,
                SelectField::Aggregate(agg) => {
                    if agg.counts_rows() {
                        if agg.aggregate != Aggregate::Count {
                            return Err(AppError::Validation(format!(
                                "Aggregate '{}' cannot read '*' (alias '{}')",
                                agg.aggregate.as_str(),
                                agg.alias
                            )));
                        }
                    } else {
                        scope.resolve(&agg.field, "field")?;
                    }
                    if agg.aggregate == Aggregate::Percentile && agg.fraction().is_none() {
                        return Err(AppError::Validation(format!(
                            "Percentile for '{}' must be a fraction in [0, 1] or a percentage in (1, 100]",
                            agg.alias
                        )));
                    }
                }
                SelectField::Window(_) => {}
            }
        }

        for group in &query.group_by {
            scope.resolve(group.field(), "group by field")?;
        }
        for filter in &query.filter {
            scope.resolve(&filter.field, "filter field")?;
        }

        let base_columns = query.base_columns();
        let mut seen = HashSet::new();
        for name in query.output_columns() {
            if !seen.insert(name.clone()) {
                return Err(AppError::Validation(format!(
                    "Duplicate output name '{}'; every alias must be unique",
                    name
                )));
            }
        }

        for filter in &query.having {
            check_output(&filter.field, &base_columns, "having field")?;
        }

        for win in query.windows() {
            match &win.field {
                Some(field) => check_output(field, &base_columns, "window field")?,
                None if win.window.requires_field() => {
                    return Err(AppError::Validation(format!(
                        "Window '{}' ({}) needs a field",
                        win.alias,
                        win.window.as_str()
                    )));
                }
                None => {}
            }
            for field in &win.partition_by {
                check_output(field, &base_columns, "window partition field")?;
            }
            for order in &win.order_by {
                check_output(&order.field, &base_columns, "window order field")?;
            }
        }

        // Aggregated and windowed results only carry their output columns
        let outputs_only = query.has_aggregates()
            || !query.group_by.is_empty()
            || query.windows().next().is_some();
        let output_columns = query.output_columns();
        for order in &query.order_by {
            if outputs_only {
                check_output(&order.field, &output_columns, "order by field")?;
            } else {
                scope.resolve(&order.field, "order by field")?;
            }
        }

        Ok(())
    }
}

/// `field` must name a column the query produces
fn check_output(field: &str, outputs: &[String], context: &str) -> Result<(), AppError> {
    if outputs.iter().any(|o| *o == output_name(field)) {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "Unknown {} '{}'; it must name a selected field or alias.{}",
        context,
        field,
        suggestion(field, outputs.iter().map(String::as_str))
    )))
}

fn with_join_hint(err: AppError, schema: &DataSchema, base: &str, joined: &str) -> AppError {
    let keys = schema.foreign_keys_between(base, joined);
    match err {
        AppError::Validation(message) if !keys.is_empty() => {
            let hints: Vec<String> = keys
                .iter()
                .map(|fk| format!("{}.{} = {}.{}", fk.from_table, fk.from_column, fk.to_table, fk.to_column))
                .collect();
            AppError::Validation(format!("{} Known relationships: {}", message, hints.join(", ")))
        }
        other => other,
    }
}

/// " Did you mean 'x'?" for the closest candidate, empty when there is none
fn suggestion<'c>(name: &str, candidates: impl IntoIterator<Item = &'c str>) -> String {
    match closest(name, candidates) {
        Some(best) => format!(" Did you mean '{}'?", best),
        None => String::new(),
    }
}

/// Candidate with the smallest edit distance; case-insensitive matches win
fn closest<'c>(name: &str, candidates: impl IntoIterator<Item = &'c str>) -> Option<&'c str> {
    let lowered = name.to_lowercase();
    candidates
        .into_iter()
        .min_by_key(|candidate| {
            if candidate.to_lowercase() == lowered {
                0
            } else {
                levenshtein(&lowered, &candidate.to_lowercase()) + 1
            }
        })
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSchema, ForeignKey};
    use serde_json::json;

    fn orders() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnSchema::new("id", "INTEGER"),
                ColumnSchema::new("customer_id", "INTEGER"),
                ColumnSchema::new("region", "TEXT"),
                ColumnSchema::new("amount", "REAL"),
                ColumnSchema::new("created_at", "TEXT"),
            ],
        )
    }

    fn schema() -> DataSchema {
        DataSchema {
            tables: vec![
                orders(),
                TableSchema::new(
                    "customers",
                    vec![ColumnSchema::new("id", "INTEGER"), ColumnSchema::new("region", "TEXT")],
                ),
            ],
            foreign_keys: vec![ForeignKey {
                from_table: "orders".into(),
                from_column: "customer_id".into(),
                to_table: "customers".into(),
                to_column: "id".into(),
            }],
        }
    }

    fn query(value: serde_json::Value) -> DslQuery {
        serde_json::from_value(value).unwrap()
    }

    fn message(result: Result<(), AppError>) -> String {
        match result {
            Err(AppError::Validation(message)) => message,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("amout", "amount"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(closest("REGION", ["amount", "region"]), Some("region"));
        assert_eq!(closest("x", Vec::<&str>::new()), None);
    }

    #[test]
    fn test_valid_query_passes() {
        let q = query(json!({
            "select": [
                "region",
                {"field": "amount", "aggregate": "median", "as": "med"},
                {"field": "*", "aggregate": "count", "as": "n"},
                {"window": "rank", "as": "rnk", "orderBy": [{"field": "med", "direction": "desc"}]}
            ],
            "groupBy": ["region", {"field": "created_at", "bucket": "month"}],
            "filter": [{"field": "amount", "op": ">", "value": 0}],
            "having": [{"field": "med", "op": ">", "value": 10}],
            "orderBy": [{"field": "rnk"}]
        }));
        assert!(SchemaValidator::validate(&orders(), &q).is_ok());
    }

    #[test]
    fn test_unknown_field_suggests_closest() {
        let q = query(json!({"select": ["amout"]}));
        let msg = message(SchemaValidator::validate(&orders(), &q));
        assert!(msg.contains("'amout'"));
        assert!(msg.contains("Did you mean 'amount'?"));

        let q = query(json!({"select": ["region"], "filter": [{"field": "regoin", "op": "=", "value": "x"}]}));
        assert!(message(SchemaValidator::validate(&orders(), &q)).contains("'region'"));
    }

    #[test]
    fn test_unknown_tables() {
        let q = query(json!({"select": ["id"]}));
        let msg = message(SchemaValidator::validate_with_joins(&schema(), "order", &q));
        assert!(msg.contains("Did you mean 'orders'?"));

        let q = query(json!({
            "select": ["id"],
            "join": [{"table": "customer", "on": {"left": "customer_id", "right": "id"}}]
        }));
        let msg = message(SchemaValidator::validate_with_joins(&schema(), "orders", &q));
        assert!(msg.contains("'customer'"));
        assert!(msg.contains("'customers'"));
    }

    #[test]
    fn test_join_keys_and_qualified_fields() {
        let q = query(json!({
            "select": ["orders.region", "customers.region"],
            "join": [{"table": "customers", "on": {"left": "orders.customer_id", "right": "id"}}]
        }));
        assert!(SchemaValidator::validate_with_joins(&schema(), "orders", &q).is_ok());

        let q = query(json!({
            "select": ["orders.region"],
            "join": [{"table": "customers", "on": {"left": "cust_id", "right": "id"}}]
        }));
        let msg = message(SchemaValidator::validate_with_joins(&schema(), "orders", &q));
        assert!(msg.contains("'cust_id'"));
        assert!(msg.contains("orders.customer_id = customers.id"));

        let q = query(json!({"select": ["customers.region"]}));
        assert!(message(SchemaValidator::validate_with_joins(&schema(), "orders", &q))
            .contains("Unknown table 'customers'"));
    }

    #[test]
    fn test_aliases_must_be_unique() {
        let q = query(json!({
            "select": ["region", {"field": "amount", "aggregate": "sum", "as": "region"}],
            "groupBy": ["region"]
        }));
        assert!(message(SchemaValidator::validate(&orders(), &q)).contains("Duplicate output name 'region'"));
    }

    #[test]
    fn test_windows_read_base_outputs() {
        let q = query(json!({
            "select": ["region", {"window": "lag", "field": "amount", "as": "prev"}]
        }));
        let msg = message(SchemaValidator::validate(&orders(), &q));
        assert!(msg.contains("window field 'amount'"));

        let q = query(json!({"select": ["amount", {"window": "running_sum", "as": "cum"}]}));
        assert!(message(SchemaValidator::validate(&orders(), &q)).contains("needs a field"));

        let q = query(json!({"select": ["amount", {"window": "row_number", "as": "n"}]}));
        assert!(SchemaValidator::validate(&orders(), &q).is_ok());
    }

    #[test]
    fn test_aggregate_arguments() {
        let q = query(json!({"select": [{"field": "*", "aggregate": "count_distinct", "as": "n"}]}));
        assert!(SchemaValidator::validate(&orders(), &q).is_err());

        let q = query(json!({
            "select": [{"field": "amount", "aggregate": "percentile", "as": "p", "percentile": 250}]
        }));
        assert!(message(SchemaValidator::validate(&orders(), &q)).contains("Percentile"));

        let q = query(json!({"select": []}));
        assert!(SchemaValidator::validate(&orders(), &q).is_err());
    }

    #[test]
    fn test_having_and_order_by_targets() {
        let q = query(json!({
            "select": ["region", {"field": "amount", "aggregate": "sum", "as": "total"}],
            "groupBy": ["region"],
            "having": [{"field": "totl", "op": ">", "value": 1}]
        }));
        assert!(message(SchemaValidator::validate(&orders(), &q)).contains("Did you mean 'total'?"));

        let q = query(json!({
            "select": ["region", {"field": "amount", "aggregate": "sum", "as": "total"}],
            "groupBy": ["region"],
            "orderBy": [{"field": "amount"}]
        }));
        assert!(SchemaValidator::validate(&orders(), &q).is_err());

        // Plain row queries may order by any column
        let q = query(json!({"select": ["region"], "orderBy": [{"field": "amount", "direction": "desc"}]}));
        assert!(SchemaValidator::validate(&orders(), &q).is_ok());
    }
}
