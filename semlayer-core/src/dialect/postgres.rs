use crate::model::TimeGranularity;

use super::Dialect;

/// Postgres (and Redshift-compatible) rendering.
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn date_trunc(&self, unit: TimeGranularity, expr: &str) -> String {
        format!("DATE_TRUNC('{}', {expr})", unit.as_str())
    }

    fn interval(&self, amount: i64, unit: TimeGranularity) -> String {
        format!("INTERVAL '{amount} {}'", unit.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_with_double_quotes() {
        assert_eq!(PostgresDialect.quote_ident("order"), "\"order\"");
    }

    #[test]
    fn date_trunc_puts_unit_first_and_quoted() {
        assert_eq!(
            PostgresDialect.date_trunc(TimeGranularity::Month, "created_at"),
            "DATE_TRUNC('month', created_at)"
        );
    }
}
