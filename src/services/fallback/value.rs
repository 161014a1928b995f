// Value semantics shared by every stage of the interpreter: number parsing,
// ordering, group keys and date bucketing. These mirror what the compiled SQL
// does so both paths agree.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Number, Value};

use crate::models::{Bucket, Row, SortDirection};

/// Separator between group key parts
const KEY_SEPARATOR: char = '\u{1f}';
/// Stand-in for a null key part
const NULL_MARKER: &str = "\u{0}";

const YEAR_RANGE: std::ops::RangeInclusive<i64> = 1800..=2200;

/// Numeric reading of a value; numeric text counts
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        _ => None,
    }
}

/// Text form of a non-null value
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Largest magnitude at which every integer is exact in an f64
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// JSON number for a computed result; integral values become integers
pub fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Output encoding of a result cell. Floats with no fractional part are
/// written as integers so `20.0` from an engine and `20` from the
/// interpreter serialize alike.
pub fn canonical(value: Value) -> Value {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) => number_value(f),
            None => Value::Number(n),
        },
        other => other,
    }
}

/// Result row holding exactly `columns`, in that order, canonically encoded.
/// Absent columns read as null.
pub fn project_row(mut row: Row, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|column| {
            let cell = row.remove(column).unwrap_or(Value::Null);
            (column.clone(), canonical(cell))
        })
        .collect()
}

/// Text order: case-insensitive first, then lowercase before uppercase for
/// strings that differ only in case
pub fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}

/// Ascending order of two values: numeric when both parse as numbers,
/// text order otherwise. Missing values sort after everything.
pub fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (is_missing(a), is_missing(b)) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ordering::Equal,
    };

    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (as_text(a), as_text(b)) {
            (Some(x), Some(y)) => compare_text(&x, &y),
            (x, y) => x.cmp(&y),
        },
    }
}

/// `compare` in the given direction; descending puts missing values first
pub fn compare_directed(a: Option<&Value>, b: Option<&Value>, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => compare(a, b),
        SortDirection::Desc => compare(a, b).reverse(),
    }
}

/// Equality used by IN lists and ties
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => as_text(a) == as_text(b),
    }
}

/// Join key parts into one grouping key
pub fn group_key<'a>(parts: impl IntoIterator<Item = Option<&'a Value>>) -> String {
    parts
        .into_iter()
        .map(|part| match part {
            None | Some(Value::Null) => NULL_MARKER.to_string(),
            Some(value) => as_text(value).unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string())
}

/// Calendar date of a value: a year in [1800, 2200], Unix seconds, or a
/// date/datetime string (offsets normalised to UTC)
pub fn to_date(value: &Value) -> Option<NaiveDate> {
    let text = as_text(value)?;
    let text = text.trim();

    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        let n: i64 = text.parse().ok()?;
        if YEAR_RANGE.contains(&n) {
            return NaiveDate::from_ymd_opt(n as i32, 1, 1);
        }
        return DateTime::<Utc>::from_timestamp(n, 0).map(|dt| dt.date_naive());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// Truncate a value to its bucket, as `YYYY-MM-DD` text. Unparseable values
/// bucket to null.
pub fn bucket(value: &Value, bucket: Bucket) -> Value {
    let Some(date) = to_date(value) else {
        return Value::Null;
    };

    let start = match bucket {
        Bucket::Day => Some(date),
        Bucket::Week => Some(date - Duration::days(date.weekday().num_days_from_monday() as i64)),
        Bucket::Month => date.with_day(1),
        Bucket::Quarter => NaiveDate::from_ymd_opt(date.year(), ((date.month() - 1) / 3) * 3 + 1, 1),
        Bucket::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    };

    start
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_from_text() {
        assert_eq!(as_number(&json!("12.5")), Some(12.5));
        assert_eq!(as_number(&json!(" 7 ")), Some(7.0));
        assert_eq!(as_number(&json!("abc")), None);
        assert_eq!(as_number(&json!("")), None);
        assert_eq!(as_number(&Value::Null), None);
    }

    #[test]
    fn test_integral_results_stay_integers() {
        assert_eq!(number_value(30.0), json!(30));
        assert_eq!(number_value(90.1), json!(90.1));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_canonical_numbers() {
        assert_eq!(canonical(json!(20.0)), json!(20));
        assert_eq!(canonical(json!(-3.0)), json!(-3));
        assert_eq!(canonical(json!(20.5)), json!(20.5));
        assert_eq!(canonical(json!(7)), json!(7));
        assert_eq!(canonical(json!("20.0")), json!("20.0"));
        assert_eq!(canonical(json!(1e300)), json!(1e300));

        let mut row = Row::new();
        row.insert("mean".to_string(), json!(45.0));
        row.insert("extra".to_string(), json!(1));
        row.insert("region".to_string(), json!("west"));
        let columns = vec!["region".to_string(), "mean".to_string(), "n".to_string()];
        let row = project_row(row, &columns);
        assert_eq!(row.keys().collect::<Vec<_>>(), ["region", "mean", "n"]);
        assert_eq!(row["mean"], json!(45));
        assert_eq!(row["region"], json!("west"));
        assert_eq!(row["n"], Value::Null);
    }

    #[test]
    fn test_compare_numeric_then_text() {
        assert_eq!(compare(Some(&json!("10")), Some(&json!(9))), Ordering::Greater);
        assert_eq!(compare(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare(Some(&json!("B")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare(Some(&json!("b")), Some(&json!("B"))), Ordering::Less);
        assert_eq!(compare(Some(&json!("Apple")), Some(&json!("apple"))), Ordering::Greater);
        assert_eq!(compare(Some(&json!("x")), Some(&json!("x"))), Ordering::Equal);
    }

    #[test]
    fn test_missing_values_last_ascending_first_descending() {
        let null = Value::Null;
        let one = json!(1);
        assert_eq!(compare(Some(&null), Some(&one)), Ordering::Greater);
        assert_eq!(compare(None, Some(&one)), Ordering::Greater);
        assert_eq!(
            compare_directed(Some(&null), Some(&one), SortDirection::Desc),
            Ordering::Less
        );
        assert_eq!(compare(None, Some(&null)), Ordering::Equal);
    }

    #[test]
    fn test_group_keys_distinguish_null() {
        let a = json!("x");
        let empty = json!("");
        assert_ne!(group_key([Some(&empty)]), group_key([Some(&Value::Null)]));
        assert_eq!(group_key([Some(&a), None]), "x\u{1f}\u{0}");
    }

    #[test]
    fn test_year_and_epoch_detection() {
        assert_eq!(to_date(&json!(2024)), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(to_date(&json!("1999")), NaiveDate::from_ymd_opt(1999, 1, 1));
        assert_eq!(to_date(&json!(86400)), NaiveDate::from_ymd_opt(1970, 1, 2));
        assert_eq!(
            to_date(&json!("2024-03-05T23:30:00-02:00")),
            NaiveDate::from_ymd_opt(2024, 3, 6)
        );
        assert_eq!(to_date(&json!("not a date")), None);
    }

    #[test]
    fn test_buckets() {
        let value = json!("2024-05-16 10:11:12");
        assert_eq!(bucket(&value, Bucket::Day), json!("2024-05-16"));
        // 2024-05-16 is a Thursday
        assert_eq!(bucket(&value, Bucket::Week), json!("2024-05-13"));
        assert_eq!(bucket(&value, Bucket::Month), json!("2024-05-01"));
        assert_eq!(bucket(&value, Bucket::Quarter), json!("2024-04-01"));
        assert_eq!(bucket(&value, Bucket::Year), json!("2024-01-01"));
        assert_eq!(bucket(&json!(2021), Bucket::Quarter), json!("2021-01-01"));
        assert_eq!(bucket(&json!("garbage"), Bucket::Month), Value::Null);
    }
}
