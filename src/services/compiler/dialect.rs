// SQL Dialects
//
// Per-dialect rendering rules: identifier quoting, literals, numeric casts,
// date bucketing and the fixed table of natively supported aggregates.

use sqlparser::ast::{Ident, Value as SqlValue};

use crate::models::{Aggregate, AggregateField, Bucket, Dialect};

/// SQL features that may differ across dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFeature {
    /// WITH (Common Table Expressions)
    CommonTableExpressions,
    /// OVER (...) window functions
    WindowFunctions,
    /// PERCENTILE_CONT ... WITHIN GROUP
    OrderedSetAggregates,
    /// STDDEV_POP
    PopulationStddev,
}

/// Rendering rules for one SQL dialect
///
/// The compiler only talks to this trait; each supported engine provides an
/// implementation with its own quoting, casts and date functions.
pub trait SqlDialect: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Character used to delimit identifiers
    fn quote_style(&self) -> char;

    /// Cast an expression so it compares as a number
    fn numeric_cast(&self, expr: &str) -> String;

    /// Truncate a date expression to a bucket, rendered as `YYYY-MM-DD` text
    fn bucket(&self, bucket: Bucket, expr: &str) -> String;

    fn supports_feature(&self, feature: SqlFeature) -> bool;

    /// Collation that makes text sort case-insensitively, when the engine
    /// defaults to byte order
    fn text_collation(&self) -> Option<&'static str> {
        None
    }

    /// Whether `aggregate` has a native SQL form in this dialect
    fn supports_aggregate(&self, aggregate: Aggregate) -> bool {
        match aggregate {
            Aggregate::Count
            | Aggregate::CountDistinct
            | Aggregate::Sum
            | Aggregate::Avg
            | Aggregate::Min
            | Aggregate::Max => true,
            Aggregate::Median | Aggregate::P25 | Aggregate::P75 | Aggregate::Percentile => {
                self.supports_feature(SqlFeature::OrderedSetAggregates)
            }
            Aggregate::Stddev => self.supports_feature(SqlFeature::PopulationStddev),
        }
    }

    /// Quote an identifier, escaping embedded quote characters
    fn quote_ident(&self, name: &str) -> String {
        Ident::with_quote(self.quote_style(), name).to_string()
    }

    fn string_literal(&self, value: &str) -> String {
        SqlValue::SingleQuotedString(value.to_string()).to_string()
    }

    /// Native SQL for an aggregate over an already rendered expression, or
    /// `None` when the dialect has no native form
    fn aggregate(&self, agg: &AggregateField, expr: &str) -> Option<String> {
        if !self.supports_aggregate(agg.aggregate) {
            return None;
        }

        let sql = match agg.aggregate {
            Aggregate::Count => format!("COUNT({})", expr),
            Aggregate::CountDistinct => format!("COUNT(DISTINCT {})", expr),
            Aggregate::Sum => format!("SUM({})", expr),
            Aggregate::Avg => format!("AVG({})", expr),
            Aggregate::Min => format!("MIN({})", expr),
            Aggregate::Max => format!("MAX({})", expr),
            Aggregate::Median | Aggregate::P25 | Aggregate::P75 | Aggregate::Percentile => {
                let fraction = agg.fraction()?;
                format!(
                    "PERCENTILE_CONT({}) WITHIN GROUP (ORDER BY {})",
                    fraction,
                    self.numeric_cast(expr)
                )
            }
            Aggregate::Stddev => format!("STDDEV_POP({})", self.numeric_cast(expr)),
        };
        Some(sql)
    }
}

/// SQLite: no ordered-set aggregates and no STDDEV_POP
pub struct SqliteDialect;

impl SqliteDialect {
    /// Integers in [1800, 2200] are years, other integers are Unix seconds
    fn temporal(expr: &str) -> String {
        format!(
            "(CASE WHEN CAST({e} AS TEXT) GLOB '[0-9]*' AND CAST({e} AS TEXT) NOT GLOB '*[^0-9]*' \
             THEN (CASE WHEN CAST({e} AS INTEGER) BETWEEN 1800 AND 2200 \
             THEN printf('%04d-01-01', CAST({e} AS INTEGER)) \
             ELSE datetime(CAST({e} AS INTEGER), 'unixepoch') END) ELSE {e} END)",
            e = expr
        )
    }
}

impl SqlDialect for SqliteDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn quote_style(&self) -> char {
        '"'
    }

    fn numeric_cast(&self, expr: &str) -> String {
        format!("CAST({} AS REAL)", expr)
    }

    fn text_collation(&self) -> Option<&'static str> {
        Some("NOCASE")
    }

    fn bucket(&self, bucket: Bucket, expr: &str) -> String {
        let value = Self::temporal(expr);
        match bucket {
            Bucket::Day => format!("date({})", value),
            Bucket::Week => format!("date({}, 'weekday 0', '-6 days')", value),
            Bucket::Month => format!("strftime('%Y-%m-01', {})", value),
            Bucket::Quarter => format!(
                "(CASE WHEN date({v}) IS NULL THEN NULL ELSE printf('%s-%02d-01', strftime('%Y', {v}), \
                 ((CAST(strftime('%m', {v}) AS INTEGER) - 1) / 3) * 3 + 1) END)",
                v = value
            ),
            Bucket::Year => format!("strftime('%Y-01-01', {})", value),
        }
    }

    fn supports_feature(&self, feature: SqlFeature) -> bool {
        match feature {
            SqlFeature::CommonTableExpressions => true,
            SqlFeature::WindowFunctions => true, // SQLite 3.25+
            SqlFeature::OrderedSetAggregates => false,
            SqlFeature::PopulationStddev => false,
        }
    }
}

/// PostgreSQL: every aggregate is native
pub struct PostgresDialect;

impl PostgresDialect {
    fn temporal(expr: &str) -> String {
        format!(
            "(CASE WHEN CAST({e} AS TEXT) ~ '^[0-9]+$' \
             THEN (CASE WHEN CAST(CAST({e} AS TEXT) AS BIGINT) BETWEEN 1800 AND 2200 \
             THEN CAST(MAKE_DATE(CAST(CAST({e} AS TEXT) AS INTEGER), 1, 1) AS TIMESTAMP) \
             ELSE CAST(TO_TIMESTAMP(CAST(CAST({e} AS TEXT) AS BIGINT)) AT TIME ZONE 'UTC' AS TIMESTAMP) END) \
             ELSE CAST(CAST({e} AS TEXT) AS TIMESTAMP) END)",
            e = expr
        )
    }
}

impl SqlDialect for PostgresDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn quote_style(&self) -> char {
        '"'
    }

    fn numeric_cast(&self, expr: &str) -> String {
        format!("CAST({} AS DOUBLE PRECISION)", expr)
    }

    fn bucket(&self, bucket: Bucket, expr: &str) -> String {
        let unit = match bucket {
            Bucket::Day => "day",
            Bucket::Week => "week",
            Bucket::Month => "month",
            Bucket::Quarter => "quarter",
            Bucket::Year => "year",
        };
        format!(
            "TO_CHAR(DATE_TRUNC('{}', {}), 'YYYY-MM-DD')",
            unit,
            Self::temporal(expr)
        )
    }

    fn supports_feature(&self, _feature: SqlFeature) -> bool {
        true
    }
}

/// MySQL 8: window functions and STDDEV_POP, no PERCENTILE_CONT
pub struct MySqlDialect;

impl MySqlDialect {
    fn temporal(expr: &str) -> String {
        format!(
            "(CASE WHEN CAST({e} AS CHAR) REGEXP '^[0-9]+$' \
             THEN (CASE WHEN CAST({e} AS UNSIGNED) BETWEEN 1800 AND 2200 \
             THEN MAKEDATE(CAST({e} AS UNSIGNED), 1) \
             ELSE FROM_UNIXTIME(CAST({e} AS UNSIGNED)) END) \
             ELSE CAST({e} AS DATETIME) END)",
            e = expr
        )
    }
}

impl SqlDialect for MySqlDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn quote_style(&self) -> char {
        '`'
    }

    fn string_literal(&self, value: &str) -> String {
        // Backslash is an escape character in MySQL string literals
        SqlValue::SingleQuotedString(value.replace('\\', "\\\\")).to_string()
    }

    fn numeric_cast(&self, expr: &str) -> String {
        format!("CAST({} AS DOUBLE)", expr)
    }

    fn bucket(&self, bucket: Bucket, expr: &str) -> String {
        let value = Self::temporal(expr);
        match bucket {
            Bucket::Day => format!("DATE_FORMAT({}, '%Y-%m-%d')", value),
            Bucket::Week => format!(
                "DATE_FORMAT(DATE_SUB({v}, INTERVAL WEEKDAY({v}) DAY), '%Y-%m-%d')",
                v = value
            ),
            Bucket::Month => format!("DATE_FORMAT({}, '%Y-%m-01')", value),
            Bucket::Quarter => format!(
                "CONCAT(YEAR({v}), '-', LPAD((QUARTER({v}) - 1) * 3 + 1, 2, '0'), '-01')",
                v = value
            ),
            Bucket::Year => format!("DATE_FORMAT({}, '%Y-01-01')", value),
        }
    }

    fn supports_feature(&self, feature: SqlFeature) -> bool {
        match feature {
            SqlFeature::CommonTableExpressions => true, // MySQL 8.0+
            SqlFeature::WindowFunctions => true,        // MySQL 8.0+
            SqlFeature::OrderedSetAggregates => false,
            SqlFeature::PopulationStddev => true,
        }
    }
}

static SQLITE: SqliteDialect = SqliteDialect;
static POSTGRES: PostgresDialect = PostgresDialect;
static MYSQL: MySqlDialect = MySqlDialect;

impl Dialect {
    /// Rendering rules for this dialect
    pub fn sql(self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Sqlite => &SQLITE,
            Dialect::Postgres => &POSTGRES,
            Dialect::Mysql => &MYSQL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(aggregate: Aggregate) -> AggregateField {
        AggregateField {
            field: "price".to_string(),
            aggregate,
            alias: "out".to_string(),
            percentile: Some(0.9),
        }
    }

    #[test]
    fn test_aggregate_support_table() {
        let sqlite = Dialect::Sqlite.sql();
        let postgres = Dialect::Postgres.sql();
        let mysql = Dialect::Mysql.sql();

        for aggregate in [Aggregate::Count, Aggregate::Sum, Aggregate::Avg, Aggregate::Max] {
            assert!(sqlite.supports_aggregate(aggregate));
            assert!(postgres.supports_aggregate(aggregate));
            assert!(mysql.supports_aggregate(aggregate));
        }

        for aggregate in [Aggregate::Median, Aggregate::P25, Aggregate::P75, Aggregate::Percentile] {
            assert!(!sqlite.supports_aggregate(aggregate));
            assert!(postgres.supports_aggregate(aggregate));
            assert!(!mysql.supports_aggregate(aggregate));
        }

        assert!(!sqlite.supports_aggregate(Aggregate::Stddev));
        assert!(postgres.supports_aggregate(Aggregate::Stddev));
        assert!(mysql.supports_aggregate(Aggregate::Stddev));
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(Dialect::Sqlite.sql().quote_ident("order date"), "\"order date\"");
        assert_eq!(Dialect::Postgres.sql().quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::Mysql.sql().quote_ident("amount"), "`amount`");
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(Dialect::Sqlite.sql().string_literal("O'Brien"), "'O''Brien'");
        assert_eq!(Dialect::Mysql.sql().string_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_postgres_percentile_and_stddev() {
        let pg = Dialect::Postgres.sql();
        assert_eq!(
            pg.aggregate(&agg(Aggregate::Percentile), "\"price\"").unwrap(),
            "PERCENTILE_CONT(0.9) WITHIN GROUP (ORDER BY CAST(\"price\" AS DOUBLE PRECISION))"
        );
        assert_eq!(
            pg.aggregate(&agg(Aggregate::Median), "\"price\"").unwrap(),
            "PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY CAST(\"price\" AS DOUBLE PRECISION))"
        );
        assert_eq!(
            pg.aggregate(&agg(Aggregate::Stddev), "\"price\"").unwrap(),
            "STDDEV_POP(CAST(\"price\" AS DOUBLE PRECISION))"
        );
    }

    #[test]
    fn test_unsupported_aggregate_has_no_native_form() {
        assert!(Dialect::Sqlite.sql().aggregate(&agg(Aggregate::Median), "x").is_none());
        assert!(Dialect::Sqlite.sql().aggregate(&agg(Aggregate::Stddev), "x").is_none());
        assert!(Dialect::Mysql.sql().aggregate(&agg(Aggregate::P75), "x").is_none());
        assert_eq!(
            Dialect::Mysql.sql().aggregate(&agg(Aggregate::CountDistinct), "`x`").unwrap(),
            "COUNT(DISTINCT `x`)"
        );
    }

    #[test]
    fn test_bucket_expressions() {
        let sqlite = Dialect::Sqlite.sql().bucket(Bucket::Month, "\"d\"");
        assert!(sqlite.starts_with("strftime('%Y-%m-01'"));
        assert!(sqlite.contains("BETWEEN 1800 AND 2200"));

        let pg = Dialect::Postgres.sql().bucket(Bucket::Quarter, "\"d\"");
        assert!(pg.starts_with("TO_CHAR(DATE_TRUNC('quarter'"));

        let mysql = Dialect::Mysql.sql().bucket(Bucket::Week, "`d`");
        assert!(mysql.contains("WEEKDAY("));
    }
}
