// Per-group aggregate reductions

use std::collections::HashSet;

use serde_json::Value;

use super::value::{as_number, as_text, compare, number_value};
use crate::models::{output_name, Aggregate, AggregateField, Row};

/// Reduce one group's rows for an aggregate. Empty or all-null input yields 0
/// for the count family and null for everything else.
pub fn compute(agg: &AggregateField, rows: &[&Row]) -> Value {
    if agg.counts_rows() {
        return match agg.aggregate {
            Aggregate::Count | Aggregate::CountDistinct => Value::from(rows.len() as u64),
            _ => Value::Null,
        };
    }

    let column = output_name(&agg.field);
    let values: Vec<&Value> = rows
        .iter()
        .filter_map(|row| row.get(&column))
        .filter(|value| !value.is_null())
        .collect();

    match agg.aggregate {
        Aggregate::Count => Value::from(values.len() as u64),
        Aggregate::CountDistinct => {
            let distinct: HashSet<String> = values.iter().filter_map(|v| as_text(v)).collect();
            Value::from(distinct.len() as u64)
        }
        Aggregate::Sum => {
            let numbers = numbers(&values);
            if numbers.is_empty() {
                Value::Null
            } else {
                number_value(numbers.iter().sum())
            }
        }
        Aggregate::Avg => mean(&numbers(&values)).map(number_value).unwrap_or(Value::Null),
        Aggregate::Min => extreme(&values, false),
        Aggregate::Max => extreme(&values, true),
        Aggregate::Median | Aggregate::P25 | Aggregate::P75 | Aggregate::Percentile => {
            let mut sorted = numbers(&values);
            sorted.sort_by(f64::total_cmp);
            agg.fraction()
                .and_then(|p| percentile(&sorted, p))
                .map(number_value)
                .unwrap_or(Value::Null)
        }
        Aggregate::Stddev => population_stddev(&numbers(&values))
            .map(number_value)
            .unwrap_or(Value::Null),
    }
}

fn numbers(values: &[&Value]) -> Vec<f64> {
    values.iter().filter_map(|v| as_number(v)).collect()
}

pub fn mean(numbers: &[f64]) -> Option<f64> {
    if numbers.is_empty() {
        None
    } else {
        Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
    }
}

/// Order statistic at fraction `p` of ascending `sorted`, interpolating
/// linearly between the neighbours of index p × (n − 1)
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let index = p * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let weight = index - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Population standard deviation (divides by n)
pub fn population_stddev(numbers: &[f64]) -> Option<f64> {
    let mean = mean(numbers)?;
    let variance =
        numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / numbers.len() as f64;
    Some(variance.sqrt())
}

/// Numeric min/max when every value is numeric, text ordering otherwise.
/// Returns the original value.
fn extreme(values: &[&Value], max: bool) -> Value {
    let all_numeric = values.iter().all(|v| as_number(v).is_some());
    let pick = values.iter().copied().reduce(|best, v| {
        let ordering = if all_numeric {
            compare(Some(v), Some(best))
        } else {
            as_text(v).cmp(&as_text(best))
        };
        let better = if max { ordering.is_gt() } else { ordering.is_lt() };
        if better {
            v
        } else {
            best
        }
    });
    pick.cloned().unwrap_or(Value::Null)
}
