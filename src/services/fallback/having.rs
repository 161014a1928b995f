// Post-aggregation predicates with the same semantics as the SQL rendering:
// numeric filter values compare numerically, comparisons against null never
// match, empty IN lists match nothing and malformed BETWEEN matches all.

use std::cmp::Ordering;

use serde_json::Value;

use super::value::{as_number, as_text, compare_text, is_missing, values_equal};
use crate::models::{output_name, Filter, FilterOp, Row};

/// Keep the rows satisfying every predicate
pub fn apply(rows: Vec<Row>, having: &[Filter]) -> Vec<Row> {
    if having.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| having.iter().all(|filter| matches(row, filter)))
        .collect()
}

pub fn matches(row: &Row, filter: &Filter) -> bool {
    let cell = row.get(&output_name(&filter.field)).or_else(|| row.get(&filter.field));
    let numeric = filter.is_numeric();

    match filter.op {
        FilterOp::IsNull => is_missing(cell),
        FilterOp::IsNotNull => !is_missing(cell),
        FilterOp::Eq | FilterOp::NotEq | FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
            let expected = match filter.value.as_ref() {
                None | Some(Value::Null) => {
                    return match filter.op {
                        FilterOp::Eq => is_missing(cell),
                        FilterOp::NotEq => !is_missing(cell),
                        _ => false,
                    };
                }
                Some(value) => value,
            };
            let Some(ordering) = cell.and_then(|c| order(c, expected, numeric)) else {
                return false;
            };
            match filter.op {
                FilterOp::Eq => ordering == Ordering::Equal,
                FilterOp::NotEq => ordering != Ordering::Equal,
                FilterOp::Gt => ordering == Ordering::Greater,
                FilterOp::Gte => ordering != Ordering::Less,
                FilterOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
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
                return negated;
            }
            let Some(cell) = cell.filter(|c| !c.is_null()) else {
                return false;
            };
            let found = items.iter().any(|item| {
                if numeric {
                    order(cell, item, true) == Some(Ordering::Equal)
                } else {
                    values_equal(cell, item)
                }
            });
            found != negated
        }
        FilterOp::Between => match filter.value.as_ref() {
            Some(Value::Array(bounds)) if bounds.len() == 2 => {
                let Some(cell) = cell else {
                    return false;
                };
                let low = order(cell, &bounds[0], numeric);
                let high = order(cell, &bounds[1], numeric);
                matches!(low, Some(Ordering::Greater | Ordering::Equal))
                    && matches!(high, Some(Ordering::Less | Ordering::Equal))
            }
            _ => true,
        },
    }
}

/// Ordering of a cell against a literal, or None when the comparison is
/// unknown (null or non-numeric cell under a numeric comparison)
fn order(cell: &Value, literal: &Value, numeric: bool) -> Option<Ordering> {
    if cell.is_null() || literal.is_null() {
        return None;
    }
    if numeric {
        let (a, b) = (as_number(cell)?, as_number(literal)?);
        return a.partial_cmp(&b);
    }
    Some(compare_text(&as_text(cell)?, &as_text(literal)?))
}
