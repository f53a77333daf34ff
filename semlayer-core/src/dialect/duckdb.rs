use crate::model::TimeGranularity;

use super::Dialect;

/// DuckDB rendering. Identifier quoting and `DATE_TRUNC` shape match
/// Postgres; DuckDB diverges mainly in approximate-aggregate naming, which
/// the shared default in [`Dialect`] already covers.
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn date_trunc(&self, unit: TimeGranularity, expr: &str) -> String {
        format!("DATE_TRUNC('{}', {expr})", unit.as_str())
    }

    fn interval(&self, amount: i64, unit: TimeGranularity) -> String {
        format!("INTERVAL {amount} {}", unit.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_has_no_quotes() {
        assert_eq!(DuckDbDialect.interval(3, TimeGranularity::Day), "INTERVAL 3 day");
    }
}
