// Capability Detector
//
// Decides per (dialect, query) whether every requested aggregate can run as
// SQL, and picks one of the four execution paths from that.

use serde::Serialize;

use crate::models::{Dialect, DslQuery};

/// Whether a compiled query can run natively in its dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capability {
    Native,
    /// Aliases of the aggregates that compiled to a placeholder
    RequiresFallback { aliases: Vec<String> },
}

impl Capability {
    pub fn requires_fallback(&self) -> bool {
        matches!(self, Capability::RequiresFallback { .. })
    }
}

/// Execution strategy chosen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    /// One compiled statement, no windows
    SqlOnly,
    /// One compiled statement with the window CTE
    SqlWithWindowCte,
    /// Raw fetch then in-process aggregation
    FallbackOnly,
    /// Raw fetch, in-process aggregation, then in-process windows
    FallbackWithWindows,
}

impl ExecutionPath {
    pub fn choose(query: &DslQuery, dialect: Dialect) -> Self {
        match (needs_fallback_aggregate(query, dialect), has_window_fields(query)) {
            (false, false) => ExecutionPath::SqlOnly,
            (false, true) => ExecutionPath::SqlWithWindowCte,
            (true, false) => ExecutionPath::FallbackOnly,
            (true, true) => ExecutionPath::FallbackWithWindows,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ExecutionPath::FallbackOnly | ExecutionPath::FallbackWithWindows)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::SqlOnly => "sql_only",
            ExecutionPath::SqlWithWindowCte => "sql_with_window_cte",
            ExecutionPath::FallbackOnly => "fallback_only",
            ExecutionPath::FallbackWithWindows => "fallback_with_windows",
        }
    }
}

/// Capability of `query`'s aggregates in `dialect`
pub fn aggregate_capability(query: &DslQuery, dialect: Dialect) -> Capability {
    let sql = dialect.sql();
    let aliases: Vec<String> = query
        .aggregates()
        .filter(|agg| {
            !sql.supports_aggregate(agg.aggregate)
                // An out-of-range percentile has no SQL form either
                || (agg.aggregate.is_percentile_family() && agg.fraction().is_none())
        })
        .map(|agg| agg.alias.clone())
        .collect();

    if aliases.is_empty() {
        Capability::Native
    } else {
        Capability::RequiresFallback { aliases }
    }
}

pub fn needs_fallback_aggregate(query: &DslQuery, dialect: Dialect) -> bool {
    aggregate_capability(query, dialect).requires_fallback()
}

/// Windows are native in every dialect; they only matter for path choice
pub fn has_window_fields(query: &DslQuery) -> bool {
    query.windows().next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(value: serde_json::Value) -> DslQuery {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_median_needs_fallback_outside_postgres() {
        let q = query(json!({
            "select": ["cat", {"field": "price", "aggregate": "median", "as": "med"}],
            "groupBy": ["cat"]
        }));

        assert!(needs_fallback_aggregate(&q, Dialect::Sqlite));
        assert!(needs_fallback_aggregate(&q, Dialect::Mysql));
        assert!(!needs_fallback_aggregate(&q, Dialect::Postgres));
        assert_eq!(
            aggregate_capability(&q, Dialect::Sqlite),
            Capability::RequiresFallback {
                aliases: vec!["med".to_string()]
            }
        );
    }

    #[test]
    fn test_stddev_native_on_mysql() {
        let q = query(json!({"select": [{"field": "x", "aggregate": "stddev", "as": "sd"}]}));
        assert!(needs_fallback_aggregate(&q, Dialect::Sqlite));
        assert!(!needs_fallback_aggregate(&q, Dialect::Mysql));
    }

    #[test]
    fn test_path_decision_table() {
        let plain = query(json!({"select": ["a", {"field": "b", "aggregate": "sum", "as": "s"}], "groupBy": ["a"]}));
        let windowed = query(json!({"select": ["a", {"window": "row_number", "as": "n"}]}));
        let fallback = query(json!({"select": [{"field": "b", "aggregate": "p75", "as": "p"}]}));
        let both = query(json!({
            "select": ["a", {"field": "b", "aggregate": "p25", "as": "p"}, {"window": "rank", "as": "r", "orderBy": [{"field": "p"}]}],
            "groupBy": ["a"]
        }));

        assert_eq!(ExecutionPath::choose(&plain, Dialect::Sqlite), ExecutionPath::SqlOnly);
        assert_eq!(ExecutionPath::choose(&windowed, Dialect::Mysql), ExecutionPath::SqlWithWindowCte);
        assert_eq!(ExecutionPath::choose(&fallback, Dialect::Sqlite), ExecutionPath::FallbackOnly);
        assert_eq!(ExecutionPath::choose(&fallback, Dialect::Postgres), ExecutionPath::SqlOnly);
        assert_eq!(ExecutionPath::choose(&both, Dialect::Sqlite), ExecutionPath::FallbackWithWindows);
        assert_eq!(ExecutionPath::choose(&both, Dialect::Postgres), ExecutionPath::SqlWithWindowCte);
        assert!(ExecutionPath::FallbackOnly.is_fallback());
        assert!(!ExecutionPath::SqlWithWindowCte.is_fallback());
    }

    #[test]
    fn test_capability_serializes_with_kind() {
        let value = serde_json::to_value(Capability::RequiresFallback {
            aliases: vec!["med".to_string()],
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "requires_fallback", "aliases": ["med"]}));
        assert_eq!(serde_json::to_value(Capability::Native).unwrap(), json!({"kind": "native"}));
    }
}
