// Expression rendering shared by the base select and the window wrapper

use serde_json::Value;

use super::dialect::SqlDialect;
use crate::models::{Filter, FilterOp, SortDirection};

/// Render a field reference. `table.column` is table-qualified, a bare
/// column renders as-is (quoted).
pub fn column(dialect: &dyn SqlDialect, field: &str) -> String {
    match field.split_once('.') {
        Some((table, name)) => format!(
            "{}.{}",
            dialect.quote_ident(table),
            dialect.quote_ident(name)
        ),
        None if field == "*" => "*".to_string(),
        None => dialect.quote_ident(field),
    }
}

/// Render a JSON value as a SQL literal
pub fn literal(dialect: &dyn SqlDialect, value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => dialect.string_literal(s),
        other => dialect.string_literal(&other.to_string()),
    }
}

/// Render a predicate over an already rendered column expression. When the
/// comparison value is numeric the column is cast so text columns compare
/// as numbers.
pub fn predicate(dialect: &dyn SqlDialect, column_expr: &str, filter: &Filter) -> String {
    let col = if filter.is_numeric() {
        dialect.numeric_cast(column_expr)
    } else {
        column_expr.to_string()
    };

    match filter.op {
        FilterOp::Eq | FilterOp::NotEq | FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
            match filter.value.as_ref() {
                None | Some(Value::Null) => match filter.op {
                    FilterOp::Eq => format!("{} IS NULL", col),
                    FilterOp::NotEq => format!("{} IS NOT NULL", col),
                    _ => "1 = 0".to_string(),
                },
                Some(value) => format!(
                    "{} {} {}",
                    col,
                    comparison_operator(filter.op),
                    literal(dialect, value)
                ),
            }
        }
        FilterOp::In | FilterOp::NotIn => {
            let items: Vec<&Value> = match filter.value.as_ref() {
                Some(Value::Array(items)) => items.iter().collect(),
                Some(Value::Null) | None => Vec::new(),
                Some(scalar) => vec![scalar],
            };
            let negated = filter.op == FilterOp::NotIn;
            if items.is_empty() {
                return if negated { "1 = 1" } else { "1 = 0" }.to_string();
            }
            let list = items
                .iter()
                .map(|item| literal(dialect, item))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} {} ({})", col, if negated { "NOT IN" } else { "IN" }, list)
        }
        FilterOp::Between => match filter.value.as_ref() {
            Some(Value::Array(bounds)) if bounds.len() == 2 => format!(
                "{} BETWEEN {} AND {}",
                col,
                literal(dialect, &bounds[0]),
                literal(dialect, &bounds[1])
            ),
            // Malformed bounds leave the rows untouched
            _ => "1 = 1".to_string(),
        },
        FilterOp::IsNull => format!("{} IS NULL", col),
        FilterOp::IsNotNull => format!("{} IS NOT NULL", col),
    }
}

fn comparison_operator(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "=",
        FilterOp::NotEq => "<>",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
        _ => "=",
    }
}

/// One ORDER BY term. Missing values go last ascending and first descending
/// in every dialect. Where the engine compares text byte-wise, text sorts
/// case-insensitively with lowercase first among case variants.
pub fn order_term(dialect: &dyn SqlDialect, expr: &str, direction: SortDirection) -> String {
    match (direction, dialect.text_collation()) {
        (SortDirection::Asc, None) => format!("({} IS NULL), {} ASC", expr, expr),
        (SortDirection::Desc, None) => format!("({} IS NULL) DESC, {} DESC", expr, expr),
        (SortDirection::Asc, Some(collation)) => format!(
            "({e} IS NULL), {e} COLLATE {c} ASC, {e} DESC",
            e = expr,
            c = collation
        ),
        (SortDirection::Desc, Some(collation)) => format!(
            "({e} IS NULL) DESC, {e} COLLATE {c} DESC, {e} ASC",
            e = expr,
            c = collation
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;
    use serde_json::json;

    fn filter(op: FilterOp, value: Option<Value>) -> Filter {
        Filter {
            field: "amount".to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_column_rendering() {
        let d = Dialect::Sqlite.sql();
        assert_eq!(column(d, "orders.amount"), "\"orders\".\"amount\"");
        assert_eq!(column(d, "amount"), "\"amount\"");
        assert_eq!(column(Dialect::Mysql.sql(), "t.c"), "`t`.`c`");
    }

    #[test]
    fn test_numeric_value_casts_column() {
        let d = Dialect::Sqlite.sql();
        assert_eq!(
            predicate(d, "\"amount\"", &filter(FilterOp::Gt, Some(json!(10)))),
            "CAST(\"amount\" AS REAL) > 10"
        );
        assert_eq!(
            predicate(d, "\"name\"", &filter(FilterOp::Eq, Some(json!("x")))),
            "\"name\" = 'x'"
        );
        assert_eq!(
            predicate(d, "\"name\"", &filter(FilterOp::NotEq, Some(json!("x")))),
            "\"name\" <> 'x'"
        );
    }

    #[test]
    fn test_set_and_range_operators() {
        let d = Dialect::Postgres.sql();
        assert_eq!(
            predicate(d, "\"r\"", &filter(FilterOp::In, Some(json!(["a", "b"])))),
            "\"r\" IN ('a', 'b')"
        );
        assert_eq!(
            predicate(d, "\"r\"", &filter(FilterOp::NotIn, Some(json!([1, 2])))),
            "CAST(\"r\" AS DOUBLE PRECISION) NOT IN (1, 2)"
        );
        assert_eq!(
            predicate(d, "\"r\"", &filter(FilterOp::In, Some(json!([])))),
            "1 = 0"
        );
        assert_eq!(
            predicate(d, "\"r\"", &filter(FilterOp::Between, Some(json!([1, 5])))),
            "CAST(\"r\" AS DOUBLE PRECISION) BETWEEN 1 AND 5"
        );
        assert_eq!(
            predicate(d, "\"r\"", &filter(FilterOp::Between, Some(json!([1])))),
            "1 = 1"
        );
    }

    #[test]
    fn test_null_operators() {
        let d = Dialect::Sqlite.sql();
        assert_eq!(predicate(d, "\"x\"", &filter(FilterOp::IsNull, None)), "\"x\" IS NULL");
        assert_eq!(
            predicate(d, "\"x\"", &filter(FilterOp::IsNotNull, None)),
            "\"x\" IS NOT NULL"
        );
        assert_eq!(predicate(d, "\"x\"", &filter(FilterOp::Eq, None)), "\"x\" IS NULL");
    }

    #[test]
    fn test_order_terms() {
        let pg = Dialect::Postgres.sql();
        assert_eq!(order_term(pg, "\"x\"", SortDirection::Asc), "(\"x\" IS NULL), \"x\" ASC");
        assert_eq!(
            order_term(pg, "\"x\"", SortDirection::Desc),
            "(\"x\" IS NULL) DESC, \"x\" DESC"
        );

        let sqlite = Dialect::Sqlite.sql();
        assert_eq!(
            order_term(sqlite, "\"x\"", SortDirection::Asc),
            "(\"x\" IS NULL), \"x\" COLLATE NOCASE ASC, \"x\" DESC"
        );
        assert_eq!(
            order_term(sqlite, "\"x\"", SortDirection::Desc),
            "(\"x\" IS NULL) DESC, \"x\" COLLATE NOCASE DESC, \"x\" ASC"
        );
    }
}
