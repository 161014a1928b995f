// Declarative Query DSL
//
// The request model consumed by the SQL compiler and the fallback engine.
// A query is built by the caller per request, never mutated and never
// persisted. The JSON grammar is camelCase: select / groupBy / filter /
// having / orderBy / join / limit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard cap on the number of rows any execution path returns
pub const MAX_ROWS: u64 = 10_000;

/// A declarative query against one base table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DslQuery {
    /// Joins applied in order after the base table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join: Vec<Join>,

    /// Output fields: plain columns, aggregates and window functions
    pub select: Vec<SelectField>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<GroupByField>,

    /// Row predicates, combined with AND
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Filter>,

    /// Post-aggregation predicates evaluated against output aliases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub having: Vec<Filter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// One entry of the select list
///
/// Resolved by exhaustive matching everywhere, so a new kind of select field
/// is a compile-time checked change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SelectField {
    /// A column, optionally qualified as `table.column`
    Field(String),
    Window(WindowField),
    Aggregate(AggregateField),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateField {
    /// Source column, or `*` for `count`
    pub field: String,
    pub aggregate: Aggregate,
    #[serde(rename = "as")]
    pub alias: String,
    /// Only read for `percentile`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    Median,
    P25,
    P75,
    Percentile,
    Stddev,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowField {
    pub window: WindowFunction,
    /// Base-select alias the function reads; unused by the ranking functions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(rename = "as")]
    pub alias: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    /// Row distance for `lag`/`lead`, defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Value used by `lag`/`lead` when the offset row does not exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    Lag,
    Lead,
    Rank,
    DenseRank,
    RowNumber,
    RunningSum,
    RunningAvg,
    PctOfTotal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum GroupByField {
    Field(String),
    Bucketed(BucketedField),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketedField {
    pub field: String,
    pub bucket: Bucket,
}

/// Date truncation granularity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Join {
    pub table: String,
    pub on: JoinOn,
    #[serde(rename = "type", default)]
    pub join_type: JoinType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinOn {
    /// Base-side key, either `table.column` or a column of the base table
    pub left: String,
    /// Joined-side key, either `table.column` or a column of the joined table
    pub right: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    #[default]
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Output column name of a field reference: `orders.amount` becomes
/// `orders_amount` so two joined tables sharing a column name do not collide.
pub fn output_name(field: &str) -> String {
    match field.split_once('.') {
        Some((table, column)) => format!("{}_{}", table, column),
        None => field.to_string(),
    }
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::CountDistinct => "count_distinct",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Median => "median",
            Aggregate::P25 => "p25",
            Aggregate::P75 => "p75",
            Aggregate::Percentile => "percentile",
            Aggregate::Stddev => "stddev",
        }
    }

    /// `count` and `count_distinct` yield 0 rather than null on empty input
    pub fn is_count_family(&self) -> bool {
        matches!(self, Aggregate::Count | Aggregate::CountDistinct)
    }

    pub fn is_percentile_family(&self) -> bool {
        matches!(
            self,
            Aggregate::Median | Aggregate::P25 | Aggregate::P75 | Aggregate::Percentile
        )
    }
}

impl AggregateField {
    /// Order-statistic fraction for the percentile family.
    ///
    /// `percentile` accepts either a fraction in [0, 1] or a percentage in
    /// (1, 100].
    pub fn fraction(&self) -> Option<f64> {
        match self.aggregate {
            Aggregate::Median => Some(0.5),
            Aggregate::P25 => Some(0.25),
            Aggregate::P75 => Some(0.75),
            Aggregate::Percentile => self.percentile.and_then(|p| {
                if (0.0..=1.0).contains(&p) {
                    Some(p)
                } else if p > 1.0 && p <= 100.0 {
                    Some(p / 100.0)
                } else {
                    None
                }
            }),
            _ => None,
        }
    }

    pub fn counts_rows(&self) -> bool {
        self.field == "*"
    }
}

impl WindowFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowFunction::Lag => "lag",
            WindowFunction::Lead => "lead",
            WindowFunction::Rank => "rank",
            WindowFunction::DenseRank => "dense_rank",
            WindowFunction::RowNumber => "row_number",
            WindowFunction::RunningSum => "running_sum",
            WindowFunction::RunningAvg => "running_avg",
            WindowFunction::PctOfTotal => "pct_of_total",
        }
    }

    /// Whether the function reads a value column
    pub fn requires_field(&self) -> bool {
        !matches!(
            self,
            WindowFunction::Rank | WindowFunction::DenseRank | WindowFunction::RowNumber
        )
    }
}

impl WindowField {
    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(1)
    }

    /// Base column the function reads, as it is named in the base output
    pub fn source_column(&self) -> Option<String> {
        self.field.as_deref().map(output_name)
    }

    pub fn partition_columns(&self) -> Vec<String> {
        self.partition_by.iter().map(|f| output_name(f)).collect()
    }
}

impl GroupByField {
    pub fn field(&self) -> &str {
        match self {
            GroupByField::Field(field) => field,
            GroupByField::Bucketed(bucketed) => &bucketed.field,
        }
    }

    pub fn bucket(&self) -> Option<Bucket> {
        match self {
            GroupByField::Field(_) => None,
            GroupByField::Bucketed(bucketed) => Some(bucketed.bucket),
        }
    }
}

impl SelectField {
    /// Name of the column this field produces in the result
    pub fn output_name(&self) -> String {
        match self {
            SelectField::Field(field) => output_name(field),
            SelectField::Aggregate(agg) => agg.alias.clone(),
            SelectField::Window(win) => win.alias.clone(),
        }
    }

    pub fn as_aggregate(&self) -> Option<&AggregateField> {
        match self {
            SelectField::Aggregate(agg) => Some(agg),
            _ => None,
        }
    }

    pub fn as_window(&self) -> Option<&WindowField> {
        match self {
            SelectField::Window(win) => Some(win),
            _ => None,
        }
    }
}

impl Filter {
    /// Whether the comparison value is numeric, in which case the column is
    /// compared as a number
    pub fn is_numeric(&self) -> bool {
        match &self.value {
            Some(Value::Number(_)) => true,
            Some(Value::Array(items)) => {
                !items.is_empty() && items.iter().all(|item| item.is_number())
            }
            _ => false,
        }
    }
}

impl DslQuery {
    pub fn aggregates(&self) -> impl Iterator<Item = &AggregateField> {
        self.select.iter().filter_map(SelectField::as_aggregate)
    }

    pub fn windows(&self) -> impl Iterator<Item = &WindowField> {
        self.select.iter().filter_map(SelectField::as_window)
    }

    pub fn has_aggregates(&self) -> bool {
        self.aggregates().next().is_some()
    }

    /// Select list without window fields
    pub fn base_select(&self) -> impl Iterator<Item = &SelectField> {
        self.select
            .iter()
            .filter(|field| !matches!(field, SelectField::Window(_)))
    }

    /// Bucket applied to a group-by field, if any
    pub fn bucket_of(&self, field: &str) -> Option<Bucket> {
        self.group_by
            .iter()
            .find(|group| group.field() == field)
            .and_then(GroupByField::bucket)
    }

    /// Bucketed group-by fields that the select list does not name; these are
    /// added to the output so the bucket key is always present.
    pub fn implicit_bucket_fields(&self) -> Vec<&BucketedField> {
        self.group_by
            .iter()
            .filter_map(|group| match group {
                GroupByField::Bucketed(bucketed) => Some(bucketed),
                GroupByField::Field(_) => None,
            })
            .filter(|bucketed| {
                !self
                    .select
                    .iter()
                    .any(|field| matches!(field, SelectField::Field(name) if *name == bucketed.field))
            })
            .collect()
    }

    /// Columns produced before window functions are applied, in output order
    pub fn base_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .implicit_bucket_fields()
            .into_iter()
            .map(|bucketed| output_name(&bucketed.field))
            .collect();
        columns.extend(self.base_select().map(SelectField::output_name));
        columns
    }

    /// Every column of the final result, in output order
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = self.base_columns();
        columns.extend(self.windows().map(|win| win.alias.clone()));
        columns
    }

    /// Aggregate producing the given output alias
    pub fn aggregate_for_alias(&self, alias: &str) -> Option<&AggregateField> {
        self.aggregates().find(|agg| agg.alias == alias)
    }

    /// Effective row cap: the requested limit, never above `MAX_ROWS`
    pub fn row_cap(&self) -> u64 {
        self.limit.unwrap_or(MAX_ROWS).min(MAX_ROWS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_query() {
        let query: DslQuery = serde_json::from_value(json!({
            "join": [{"table": "customers", "on": {"left": "orders.customer_id", "right": "id"}}],
            "select": [
                "region",
                {"field": "amount", "aggregate": "sum", "as": "total"},
                {"field": "amount", "aggregate": "percentile", "as": "p90", "percentile": 0.9},
                {"window": "rank", "as": "rnk", "orderBy": [{"field": "total", "direction": "desc"}]}
            ],
            "groupBy": ["region", {"field": "created_at", "bucket": "month"}],
            "filter": [{"field": "amount", "op": ">", "value": 10}],
            "having": [{"field": "total", "op": "between", "value": [1, 100]}],
            "orderBy": [{"field": "total"}],
            "limit": 50
        }))
        .unwrap();

        assert_eq!(query.join.len(), 1);
        assert_eq!(query.join[0].join_type, JoinType::Left);
        assert!(matches!(query.select[0], SelectField::Field(ref f) if f == "region"));
        assert!(matches!(query.select[1], SelectField::Aggregate(_)));
        assert!(matches!(query.select[3], SelectField::Window(_)));
        assert_eq!(query.group_by[1].bucket(), Some(Bucket::Month));
        assert_eq!(query.filter[0].op, FilterOp::Gt);
        assert_eq!(query.having[0].op, FilterOp::Between);
        assert_eq!(query.order_by[0].direction, SortDirection::Asc);
        assert_eq!(query.limit, Some(50));
    }

    #[test]
    fn test_filter_ops_parse() {
        for (text, op) in [
            ("=", FilterOp::Eq),
            ("!=", FilterOp::NotEq),
            ("<=", FilterOp::Lte),
            ("not_in", FilterOp::NotIn),
            ("is_not_null", FilterOp::IsNotNull),
        ] {
            let filter: Filter =
                serde_json::from_value(json!({"field": "x", "op": text})).unwrap();
            assert_eq!(filter.op, op);
            assert!(filter.value.is_none());
        }
    }

    #[test]
    fn test_output_names() {
        assert_eq!(output_name("orders.amount"), "orders_amount");
        assert_eq!(output_name("amount"), "amount");
    }

    #[test]
    fn test_implicit_bucket_column_comes_first() {
        let query: DslQuery = serde_json::from_value(json!({
            "select": [{"field": "amount", "aggregate": "sum", "as": "total"}],
            "groupBy": [{"field": "created_at", "bucket": "year"}]
        }))
        .unwrap();

        assert_eq!(query.output_columns(), vec!["created_at", "total"]);

        let selected: DslQuery = serde_json::from_value(json!({
            "select": ["created_at", {"field": "amount", "aggregate": "sum", "as": "total"}],
            "groupBy": [{"field": "created_at", "bucket": "year"}]
        }))
        .unwrap();
        assert!(selected.implicit_bucket_fields().is_empty());
        assert_eq!(selected.output_columns(), vec!["created_at", "total"]);
    }

    #[test]
    fn test_row_cap() {
        let mut query = DslQuery::default();
        assert_eq!(query.row_cap(), MAX_ROWS);
        query.limit = Some(50_000);
        assert_eq!(query.row_cap(), 10_000);
        query.limit = Some(1_500);
        assert_eq!(query.row_cap(), 1_500);
    }

    #[test]
    fn test_percentile_fraction() {
        let mut agg = AggregateField {
            field: "x".to_string(),
            aggregate: Aggregate::Percentile,
            alias: "p".to_string(),
            percentile: Some(90.0),
        };
        assert_eq!(agg.fraction(), Some(0.9));
        agg.percentile = Some(0.25);
        assert_eq!(agg.fraction(), Some(0.25));
        agg.percentile = Some(150.0);
        assert_eq!(agg.fraction(), None);
        agg.aggregate = Aggregate::Median;
        assert_eq!(agg.fraction(), Some(0.5));
    }
}
