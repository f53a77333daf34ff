//! The SQL AST facility: the only place in the crate that owns SQL syntax
//! knowledge. Everything upstream (metric resolver, filter classifier,
//! planner) asks this module to parse a fragment, inspect it, or rewrite it
//! rather than touching `sqlparser` types directly.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Ident};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::dialect::{Dialect, DialectKind};
use crate::error::{CompileError, Result};
use crate::model::TimeGranularity;

/// Function names the spec treats as aggregates (§4.1), matched
/// case-insensitively against a parsed `Expr::Function` or, as a fallback
/// when parsing fails, against raw text immediately followed by `(`.
const AGGREGATE_NAMES: &[&str] = &[
    "sum",
    "avg",
    "count",
    "min",
    "max",
    "median",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "variance",
    "var_pop",
    "var_samp",
    "approx_count_distinct",
    "approx_distinct",
    "approx_quantile",
    "mode",
    "quantile",
    "percentile",
];

static AGGREGATE_FALLBACK_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = AGGREGATE_NAMES.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\s*\(")).expect("valid aggregate regex")
});

/// All dialects currently share `sqlparser`'s `GenericDialect` for parsing —
/// the dialect-specific divergences the spec calls out (date truncation
/// shape, identifier quoting) are rendering concerns handled by
/// [`crate::dialect::Dialect`], not parsing-grammar differences.
fn parser_dialect(_dialect: DialectKind) -> GenericDialect {
    GenericDialect {}
}

/// Parse a standalone SQL boolean/scalar expression fragment.
pub fn parse(sql: &str, dialect: DialectKind) -> Result<Expr> {
    let d = parser_dialect(dialect);
    let mut parser = Parser::new(&d).try_with_sql(sql).map_err(|e| CompileError::ParseError {
        fragment: sql.to_string(),
        reason: e.to_string(),
    })?;
    parser.parse_expr().map_err(|e| CompileError::ParseError {
        fragment: sql.to_string(),
        reason: e.to_string(),
    })
}

/// Depth-first pre-order walk over every node reachable from `expr`
/// (including `expr` itself), via a visitor callback.
pub fn walk<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk(left, visit);
            walk(right, visit);
        }
        Expr::UnaryOp { expr: inner, .. } => walk(inner, visit),
        Expr::Nested(inner) => walk(inner, visit),
        Expr::Cast { expr: inner, .. } => walk(inner, visit),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(o) = operand {
                walk(o, visit);
            }
            for c in conditions {
                walk(c, visit);
            }
            for r in results {
                walk(r, visit);
            }
            if let Some(e) = else_result {
                walk(e, visit);
            }
        }
        Expr::InList { expr: inner, list, .. } => {
            walk(inner, visit);
            for item in list {
                walk(item, visit);
            }
        }
        Expr::Between {
            expr: inner,
            low,
            high,
            ..
        } => {
            walk(inner, visit);
            walk(low, visit);
            walk(high, visit);
        }
        Expr::Function(f) => {
            if let FunctionArguments::List(list) = &f.args {
                for arg in &list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                    | FunctionArg::Named {
                        arg: FunctionArgExpr::Expr(e),
                        ..
                    } = arg
                    {
                        walk(e, visit);
                    }
                }
            }
        }
        _ => {}
    }
}

/// True if any descendant of `expr` is a call to one of [`AGGREGATE_NAMES`].
pub fn has_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    walk(expr, &mut |node| {
        if let Expr::Function(f) = node {
            if let Some(first) = f.name.0.first() {
                if AGGREGATE_NAMES
                    .iter()
                    .any(|n| n.eq_ignore_ascii_case(&first.value))
                {
                    found = true;
                }
            }
        }
    });
    found
}

/// Regex fallback used when a fragment fails to parse: matches the listed
/// aggregate names immediately followed by `(`, per spec.md §4.1.
pub fn has_aggregate_text_fallback(sql: &str) -> bool {
    AGGREGATE_FALLBACK_RE.is_match(sql)
}

/// Collect the set of bare/compound identifier names referenced anywhere in
/// `expr` (e.g. `revenue`, `orders.revenue`). Used by the metric resolver to
/// extract a derived metric's dependencies and by the filter classifier to
/// decide which bucket a predicate belongs to.
pub fn collect_identifiers(expr: &Expr) -> Vec<String> {
    let mut names = Vec::new();
    walk(expr, &mut |node| match node {
        Expr::Identifier(ident) => names.push(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => {
            names.push(
                parts
                    .iter()
                    .map(|p| p.value.as_str())
                    .collect::<Vec<_>>()
                    .join("."),
            );
        }
        _ => {}
    });
    names
}

/// Rewrite every identifier/compound-identifier leaf by replacing it with
/// whatever string `f` returns for its dotted name. Used for word-boundary
/// safe substitution when composing derived metrics: rewriting only matches
/// whole identifier nodes, never substrings of a longer name.
pub fn rewrite_identifiers(expr: &Expr, f: &mut dyn FnMut(&str) -> Option<String>) -> Expr {
    match expr {
        Expr::Identifier(ident) => match f(&ident.value) {
            Some(replacement) => Expr::Identifier(Ident::new(replacement)),
            None => expr.clone(),
        },
        Expr::CompoundIdentifier(parts) => {
            let dotted = parts
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            match f(&dotted) {
                Some(replacement) => Expr::Identifier(Ident::new(replacement)),
                None => expr.clone(),
            }
        }
        Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(rewrite_identifiers(left, f)),
            op: op.clone(),
            right: Box::new(rewrite_identifiers(right, f)),
        },
        Expr::UnaryOp { op, expr: inner } => Expr::UnaryOp {
            op: *op,
            expr: Box::new(rewrite_identifiers(inner, f)),
        },
        Expr::Nested(inner) => Expr::Nested(Box::new(rewrite_identifiers(inner, f))),
        other => other.clone(),
    }
}

/// Emit `expr` as SQL text, quoting any bare/compound identifier with
/// `dialect`'s quoting convention. Non-identifier structure is rendered via
/// `sqlparser`'s own `Display` impl, since the grammar itself does not vary
/// across the dialects this crate targets.
pub fn emit(expr: &Expr, dialect: &dyn Dialect) -> String {
    let quoted = rewrite_identifiers(expr, &mut |name| {
        let parts: Vec<String> = name.split('.').map(|p| dialect.quote_ident(p)).collect();
        Some(parts.join("."))
    });
    quoted.to_string()
}

/// Parse `sql` under `from_dialect`'s grammar and re-emit it quoted for
/// `to_dialect`. Function-name/argument-order divergences (e.g.
/// `DATE_TRUNC`) are not generically reconcilable here since they depend on
/// which logical construct produced the call; callers that need a
/// `DATE_TRUNC` translated use [`crate::dialect::Dialect::date_trunc`]
/// directly when building the expression rather than round-tripping text.
pub fn translate(sql: &str, from_dialect: DialectKind, to_dialect: DialectKind) -> Result<String> {
    let expr = parse(sql, from_dialect)?;
    Ok(emit(&expr, to_dialect.driver()))
}

/// Truncate an identifier expression to a time granularity using the given
/// dialect's call shape.
pub fn date_trunc_expr(expr_sql: &str, unit: TimeGranularity, dialect: &dyn Dialect) -> String {
    dialect.date_trunc(unit, expr_sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_predicate() {
        let expr = parse("status = 'completed'", DialectKind::Postgres).unwrap();
        assert!(matches!(expr, Expr::BinaryOp { .. }));
    }

    #[test]
    fn detects_aggregate_function() {
        let expr = parse("SUM(amount)", DialectKind::Postgres).unwrap();
        assert!(has_aggregate(&expr));
        let expr = parse("amount + 1", DialectKind::Postgres).unwrap();
        assert!(!has_aggregate(&expr));
    }

    #[test]
    fn regex_fallback_matches_aggregate_prefix() {
        assert!(has_aggregate_text_fallback("sum(x) + weird_syntax["));
        assert!(!has_aggregate_text_fallback("amount + 1"));
    }

    #[test]
    fn collects_compound_identifiers() {
        let expr = parse("orders.status = 'x'", DialectKind::Postgres).unwrap();
        let ids = collect_identifiers(&expr);
        assert!(ids.contains(&"orders.status".to_string()));
    }

    #[test]
    fn word_boundary_substitution_does_not_match_prefix() {
        // `revenue` must not match inside `gross_revenue`.
        let expr = parse("gross_revenue - revenue", DialectKind::Postgres).unwrap();
        let rewritten = rewrite_identifiers(&expr, &mut |name| {
            if name == "revenue" {
                Some("base_tbl.revenue_col".to_string())
            } else {
                None
            }
        });
        let sql = rewritten.to_string();
        assert!(sql.contains("gross_revenue"));
        assert!(sql.contains("base_tbl.revenue_col"));
        assert!(!sql.contains("gross_base_tbl"));
    }

    #[test]
    fn emit_quotes_identifiers_per_dialect() {
        let expr = parse("status", DialectKind::Postgres).unwrap();
        let sql = emit(&expr, DialectKind::BigQuery.driver());
        assert_eq!(sql, "`status`");
    }
}
