use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row keyed by output column name, in column order
pub type Row = Map<String, Value>;

/// Normalized outcome of a query, identical in shape for every execution path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Row count before truncation to the row cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(rows: Vec<Row>, columns: Vec<String>, total_rows: usize, truncated: bool) -> Self {
        Self {
            ok: true,
            rows: Some(rows),
            columns: Some(columns),
            total_rows: Some(total_rows),
            truncated: Some(truncated),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            rows: None,
            columns: None,
            total_rows: None,
            truncated: None,
            error: Some(error.into()),
        }
    }

    pub fn rows(&self) -> &[Row] {
        self.rows.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_serializes_without_payload() {
        let result = ExecutionResult::failure("boom");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"ok": false, "error": "boom"})
        );
    }

    #[test]
    fn test_success_uses_camel_case() {
        let mut row = Row::new();
        row.insert("a".to_string(), json!(1));
        let result = ExecutionResult::success(vec![row], vec!["a".to_string()], 3, true);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["totalRows"], json!(3));
        assert_eq!(value["truncated"], json!(true));
        assert_eq!(result.rows().len(), 1);
    }

    #[test]
    fn test_rows_serialize_in_column_order() {
        let mut row = Row::new();
        row.insert("region".to_string(), json!("east"));
        row.insert("avg".to_string(), json!(20));
        let result = ExecutionResult::success(
            vec![row],
            vec!["region".to_string(), "avg".to_string()],
            1,
            false,
        );
        let text = serde_json::to_string(&result).unwrap();
        assert!(text.contains(r#""rows":[{"region":"east","avg":20}]"#), "{}", text);
    }
}
