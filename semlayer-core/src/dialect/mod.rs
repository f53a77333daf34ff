//! Dialect abstractions. A [`Dialect`] is the only place that owns knowledge
//! of how a logical construct (identifier quoting, an aggregate function, a
//! time truncation, an interval, a literal) differs between target
//! databases. Everything upstream of rendering — the planner, the metric
//! resolver, the filter classifier — works in terms of a single canonical
//! form and leaves translation entirely to this layer.

use serde_json::Value;

use crate::model::{Aggregation, TimeGranularity};

mod bigquery;
mod duckdb;
mod postgres;

pub use bigquery::BigQueryDialect;
pub use duckdb::DuckDbDialect;
pub use postgres::PostgresDialect;

/// Target SQL dialect name, as accepted in [`crate::request::Request::dialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    DuckDb,
    Postgres,
    BigQuery,
}

impl DialectKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "duckdb" => Some(Self::DuckDb),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "bigquery" => Some(Self::BigQuery),
            _ => None,
        }
    }

    pub fn driver(&self) -> &'static dyn Dialect {
        match self {
            DialectKind::DuckDb => &DuckDbDialect,
            DialectKind::Postgres => &PostgresDialect,
            DialectKind::BigQuery => &BigQueryDialect,
        }
    }
}

/// Dialects render identifiers and primitive expression pieces. Expression
/// tree assembly lives in the query planner; the dialect only maps logical
/// constructs (a quoted identifier, an aggregate call, a truncation) to SQL
/// text.
pub trait Dialect {
    fn name(&self) -> &'static str;

    fn quote_ident(&self, ident: &str) -> String;

    /// `DATE_TRUNC` in this dialect's argument order, applied to `expr`.
    fn date_trunc(&self, unit: TimeGranularity, expr: &str) -> String;

    /// An interval literal, e.g. `INTERVAL 3 DAY` or `INTERVAL '3 day'`.
    fn interval(&self, amount: i64, unit: TimeGranularity) -> String;

    /// `CURRENT_DATE - N days` as this dialect spells date subtraction.
    fn date_sub_days(&self, n: i64) -> String {
        format!("CURRENT_DATE - {n}")
    }

    /// Null-safe division guard: `CAST(num AS DOUBLE) / NULLIF(den, 0)`.
    fn safe_divide(&self, num: &str, den: &str) -> String {
        format!("CAST({num} AS DOUBLE) / NULLIF({den}, 0)")
    }

    fn render_aggregation(&self, agg: Aggregation, expr: &str) -> String {
        match agg {
            Aggregation::Sum => format!("SUM({expr})"),
            Aggregation::Avg => format!("AVG({expr})"),
            Aggregation::Count => format!("COUNT({expr})"),
            Aggregation::CountDistinct => format!("COUNT(DISTINCT {expr})"),
            Aggregation::Min => format!("MIN({expr})"),
            Aggregation::Max => format!("MAX({expr})"),
            Aggregation::Median => format!("MEDIAN({expr})"),
            Aggregation::Stddev => format!("STDDEV({expr})"),
            Aggregation::StddevPop => format!("STDDEV_POP({expr})"),
            Aggregation::StddevSamp => format!("STDDEV_SAMP({expr})"),
            Aggregation::Variance => format!("VARIANCE({expr})"),
            Aggregation::VarPop => format!("VAR_POP({expr})"),
            Aggregation::ApproxDistinct => format!("APPROX_COUNT_DISTINCT({expr})"),
            Aggregation::ApproxQuantile => format!("APPROX_QUANTILE({expr}, 0.5)"),
            Aggregation::Mode => format!("MODE({expr})"),
        }
    }

    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Array(items) => items
                .iter()
                .map(|v| self.render_literal(v))
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(_) => format!("'{}'", value.to_string().replace('\'', "''")),
        }
    }
}
