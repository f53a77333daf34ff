use crate::model::TimeGranularity;

use super::Dialect;

/// BigQuery rendering. `DATE_TRUNC` takes the expression first and a bare
/// (unquoted) unit keyword second — the opposite argument order and quoting
/// convention from Postgres/DuckDB, which is exactly the divergence
/// spec.md §4.9/§6 calls out.
pub struct BigQueryDialect;

impl Dialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn date_trunc(&self, unit: TimeGranularity, expr: &str) -> String {
        format!("DATE_TRUNC({expr}, {})", unit.as_str().to_ascii_uppercase())
    }

    fn interval(&self, amount: i64, unit: TimeGranularity) -> String {
        format!("INTERVAL {amount} {}", unit.as_str().to_ascii_uppercase())
    }
}
