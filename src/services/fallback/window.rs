// Window functions over in-memory rows
//
// Each window partitions the rows, stably sorts every partition by its
// orderBy and writes one value per row under the window alias. Rows keep
// their original positions; only the computed column is added.

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde_json::Value;

use super::value::{as_number, compare_directed, group_key, number_value};
use crate::models::{output_name, OrderBy, Row, WindowField, WindowFunction};

/// Compare two rows on a list of orderBy terms
pub fn compare_rows(a: &Row, b: &Row, order_by: &[OrderBy]) -> Ordering {
    for term in order_by {
        let column = output_name(&term.field);
        let ordering = compare_directed(a.get(&column), b.get(&column), term.direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort of rows by the outer orderBy
pub fn sort_rows(rows: &mut [Row], order_by: &[OrderBy]) {
    if !order_by.is_empty() {
        rows.sort_by(|a, b| compare_rows(a, b, order_by));
    }
}

/// Apply windows in select order
pub fn apply<'a>(rows: &mut [Row], windows: impl IntoIterator<Item = &'a WindowField>) {
    for window in windows {
        let values = evaluate(rows, window);
        for (row, value) in rows.iter_mut().zip(values) {
            row.insert(window.alias.clone(), value);
        }
    }
}

fn cell<'r>(rows: &'r [Row], column: Option<&str>, index: usize) -> Option<&'r Value> {
    column.and_then(|c| rows[index].get(c))
}

/// Values of one window, indexed like `rows`
fn evaluate(rows: &[Row], window: &WindowField) -> Vec<Value> {
    let partition_columns = window.partition_columns();
    let mut partitions: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (index, row) in rows.iter().enumerate() {
        let key = group_key(partition_columns.iter().map(|c| row.get(c)));
        partitions.entry(key).or_default().push(index);
    }

    let source = window.source_column();
    let read = |index: usize| cell(rows, source.as_deref(), index);

    let mut out = vec![Value::Null; rows.len()];
    for indices in partitions.values_mut() {
        indices.sort_by(|&a, &b| compare_rows(&rows[a], &rows[b], &window.order_by));
        let ties = |a: usize, b: usize| {
            compare_rows(&rows[a], &rows[b], &window.order_by) == Ordering::Equal
        };

        match window.window {
            WindowFunction::Lag | WindowFunction::Lead => {
                let offset = window.offset();
                let default = window.default.clone().unwrap_or(Value::Null);
                for (pos, &index) in indices.iter().enumerate() {
                    let target = if window.window == WindowFunction::Lag {
                        pos.checked_sub(offset)
                    } else {
                        Some(pos + offset).filter(|&t| t < indices.len())
                    };
                    out[index] = match target {
                        Some(t) => read(indices[t]).cloned().unwrap_or(Value::Null),
                        None => default.clone(),
                    };
                }
            }
            WindowFunction::RowNumber => {
                for (pos, &index) in indices.iter().enumerate() {
                    out[index] = Value::from(pos as u64 + 1);
                }
            }
            WindowFunction::Rank | WindowFunction::DenseRank => {
                let dense = window.window == WindowFunction::DenseRank;
                let mut rank = 0u64;
                for (pos, &index) in indices.iter().enumerate() {
                    if pos == 0 || !ties(indices[pos - 1], index) {
                        rank = if dense { rank + 1 } else { pos as u64 + 1 };
                    }
                    out[index] = Value::from(rank);
                }
            }
            WindowFunction::RunningSum | WindowFunction::RunningAvg => {
                let mut sum = 0.0;
                let mut count = 0usize;
                for &index in indices.iter() {
                    if let Some(n) = read(index).and_then(as_number) {
                        sum += n;
                        count += 1;
                    }
                    out[index] = match (count, window.window) {
                        (0, _) => Value::Null,
                        (_, WindowFunction::RunningSum) => number_value(sum),
                        _ => number_value(sum / count as f64),
                    };
                }
            }
            WindowFunction::PctOfTotal => {
                let total: f64 = indices.iter().filter_map(|&i| read(i).and_then(as_number)).sum();
                for &index in indices.iter() {
                    out[index] = match read(index).and_then(as_number) {
                        Some(n) if total != 0.0 => number_value(n / total),
                        _ => Value::Null,
                    };
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(data: &[(&str, i64)]) -> Vec<Row> {
        data.iter()
            .map(|(group, v)| {
                let mut row = Row::new();
                row.insert("g".to_string(), json!(group));
                row.insert("v".to_string(), json!(v));
                row
            })
            .collect()
    }

    fn window(value: serde_json::Value) -> WindowField {
        serde_json::from_value(value).unwrap()
    }

    fn column(rows: &[Row], name: &str) -> Vec<Value> {
        rows.iter().map(|r| r.get(name).cloned().unwrap_or(Value::Null)).collect()
    }

    #[test]
    fn test_rank_dense_rank_and_row_number() {
        let mut data = rows(&[("a", 10), ("a", 20), ("a", 20), ("a", 30)]);
        let order = json!([{"field": "v"}]);
        apply(
            &mut data,
            [
                &window(json!({"window": "rank", "as": "r", "orderBy": order})),
                &window(json!({"window": "dense_rank", "as": "d", "orderBy": order})),
                &window(json!({"window": "row_number", "as": "n", "orderBy": order})),
            ],
        );

        assert_eq!(column(&data, "r"), vec![json!(1), json!(2), json!(2), json!(4)]);
        assert_eq!(column(&data, "d"), vec![json!(1), json!(2), json!(2), json!(3)]);
        assert_eq!(column(&data, "n"), vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_lag_and_lead_respect_offset_and_default() {
        let mut data = rows(&[("a", 1), ("a", 2), ("a", 3), ("b", 4)]);
        apply(
            &mut data,
            [
                &window(json!({"window": "lag", "field": "v", "as": "prev", "partitionBy": ["g"], "orderBy": [{"field": "v"}]})),
                &window(json!({"window": "lead", "field": "v", "as": "next2", "offset": 2, "default": -1, "orderBy": [{"field": "v"}]})),
            ],
        );

        assert_eq!(column(&data, "prev"), vec![Value::Null, json!(1), json!(2), Value::Null]);
        assert_eq!(column(&data, "next2"), vec![json!(3), json!(4), json!(-1), json!(-1)]);
    }

    #[test]
    fn test_running_totals_follow_partition_order() {
        let mut data = rows(&[("a", 3), ("a", 1), ("b", 5), ("a", 2)]);
        apply(
            &mut data,
            [
                &window(json!({"window": "running_sum", "field": "v", "as": "cum", "partitionBy": ["g"], "orderBy": [{"field": "v"}]})),
                &window(json!({"window": "running_avg", "field": "v", "as": "avg", "partitionBy": ["g"], "orderBy": [{"field": "v"}]})),
            ],
        );

        assert_eq!(column(&data, "cum"), vec![json!(6), json!(1), json!(5), json!(3)]);
        assert_eq!(column(&data, "avg"), vec![json!(2), json!(1), json!(5), json!(1.5)]);
    }

    #[test]
    fn test_pct_of_total_sums_to_one_per_partition() {
        let mut data = rows(&[("a", 1), ("a", 3), ("b", 2), ("b", 2), ("c", 0)]);
        apply(
            &mut data,
            [&window(json!({"window": "pct_of_total", "field": "v", "as": "share", "partitionBy": ["g"]}))],
        );

        let share_a: f64 = data[..2].iter().map(|r| r["share"].as_f64().unwrap()).sum();
        let share_b: f64 = data[2..4].iter().map(|r| r["share"].as_f64().unwrap()).sum();
        assert!((share_a - 1.0).abs() < 1e-9);
        assert!((share_b - 1.0).abs() < 1e-9);
        assert_eq!(data[4]["share"], Value::Null);
    }

    #[test]
    fn test_text_sorts_ignoring_case_first() {
        let mut data = rows(&[("b", 1), ("B", 2), ("a", 3)]);
        sort_rows(&mut data, &[OrderBy { field: "g".to_string(), direction: crate::models::SortDirection::Asc }]);
        assert_eq!(column(&data, "g"), vec![json!("a"), json!("b"), json!("B")]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let mut data = rows(&[("x", 2), ("y", 1), ("z", 2)]);
        sort_rows(&mut data, &[OrderBy { field: "v".to_string(), direction: crate::models::SortDirection::Desc }]);
        assert_eq!(column(&data, "g"), vec![json!("x"), json!("z"), json!("y")]);
    }
}
