//! The relative-date expander (spec.md §4.5) and the filter classifier
//! (spec.md §4.4).
//!
//! Both operate on raw filter fragments *before* they reach the planner:
//! the expander rewrites recognised relative-date literals into
//! dialect-neutral expressions; the classifier then partitions the
//! (possibly rewritten) fragments into the four buckets the planner places
//! in different parts of the rendered SQL.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dialect::Dialect;
use crate::model::TimeGranularity;
use crate::sql_ast;

/// Matches `<identifier> <op> '<literal>'`, the only shape relative-date
/// tokens appear in per spec.md §4.5's examples (a comparison against a
/// quoted literal).
static RELATIVE_DATE_COMPARISON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<col>[A-Za-z_][\w.]*)\s*(?P<op>=|!=|>=|<=|>|<)\s*'(?P<lit>[^']*)'")
        .expect("valid relative-date regex")
});

static LAST_N_DAYS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^last\s+(\d+)\s+days?$").unwrap());
static LAST_N_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^last\s+(\d+)\s+(weeks?|months?|years?)$").unwrap());
static THIS_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^this\s+(week|month|quarter|year)$").unwrap());

fn plural_unit_to_granularity(unit: &str) -> Option<TimeGranularity> {
    let singular = unit.trim_end_matches('s');
    TimeGranularity::parse(singular)
}

/// Replace every recognised relative-date literal in `fragment` with a
/// dialect-neutral expression rendered via `dialect`. Unrecognised literals
/// pass through unchanged, per spec.md §4.5.
pub fn expand_relative_dates(fragment: &str, dialect: &dyn Dialect) -> String {
    RELATIVE_DATE_COMPARISON_RE
        .replace_all(fragment, |caps: &regex::Captures| {
            let col = &caps["col"];
            let op = &caps["op"];
            let lit = &caps["lit"];
            match expand_literal(lit, op, col, dialect) {
                Some(expanded) => expanded,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn expand_literal(lit: &str, op: &str, col: &str, dialect: &dyn Dialect) -> Option<String> {
    let lower = lit.to_ascii_lowercase();

    if lower == "today" {
        return Some(format!("{col} {op} CURRENT_DATE"));
    }
    if lower == "yesterday" {
        return Some(format!("{col} {op} {}", dialect.date_sub_days(1)));
    }
    if let Some(caps) = LAST_N_DAYS_RE.captures(&lower) {
        let n: i64 = caps[1].parse().ok()?;
        return Some(format!("{col} {op} {}", dialect.date_sub_days(n)));
    }
    if let Some(caps) = LAST_N_UNIT_RE.captures(&lower) {
        let n: i64 = caps[1].parse().ok()?;
        let unit = plural_unit_to_granularity(&caps[2])?;
        return Some(format!("{col} {op} CURRENT_DATE - {}", dialect.interval(n, unit)));
    }
    if let Some(caps) = THIS_UNIT_RE.captures(&lower) {
        let unit = TimeGranularity::parse(&caps[1])?;
        let truncated = dialect.date_trunc(unit, "CURRENT_DATE");
        if op == "=" {
            let upper = format!("{truncated} + {}", dialect.interval(1, unit));
            return Some(format!("({col} >= {truncated} AND {col} < {upper})"));
        }
        return Some(format!("{col} {op} {truncated}"));
    }
    None
}

/// The bucket a classified filter fragment belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterBucket {
    /// References only columns of one model and no metric output; goes
    /// into that model's CTE `WHERE`.
    CtePushdown { model: String, sql: String },
    /// References a requested metric's output name; goes into the outer
    /// `HAVING`.
    Having { sql: String },
    /// Spans multiple models, or references dimensions only resolvable
    /// after the join.
    OuterWhere { sql: String },
}

/// Partitions request-level filter fragments into CTE-pushdown / HAVING /
/// outer-WHERE buckets (spec.md §4.4). Metric-local `filters` declared on a
/// [`crate::model::Metric`] never pass through this classifier — they are
/// rendered as `CASE WHEN` directly by the metric resolver.
pub struct FilterClassifier<'a> {
    /// Output names of the metrics present in the request (used to detect
    /// HAVING-bound predicates).
    pub requested_metric_names: &'a BTreeSet<String>,
    pub dialect: &'a dyn Dialect,
}

impl<'a> FilterClassifier<'a> {
    pub fn classify(&self, fragment: &str) -> FilterBucket {
        let expanded = expand_relative_dates(fragment, self.dialect);

        let Ok(expr) = sql_ast::parse(&expanded, crate::dialect::DialectKind::Postgres) else {
            // Unparsable fragments are treated conservatively as
            // outer-WHERE so they are never silently dropped.
            return FilterBucket::OuterWhere { sql: expanded };
        };

        let idents = sql_ast::collect_identifiers(&expr);
        let mut models = BTreeSet::new();
        let mut bare_names = BTreeSet::new();
        for ident in &idents {
            match ident.split_once('.') {
                Some((model, field)) => {
                    models.insert(model.to_string());
                    bare_names.insert(field.to_string());
                }
                None => {
                    bare_names.insert(ident.clone());
                }
            }
        }

        if bare_names
            .iter()
            .any(|n| self.requested_metric_names.contains(n))
        {
            return FilterBucket::Having { sql: expanded };
        }

        if models.len() == 1 {
            let model = models.into_iter().next().unwrap();
            return FilterBucket::CtePushdown {
                model,
                sql: expanded,
            };
        }

        FilterBucket::OuterWhere { sql: expanded }
    }

    /// Every column a classified fragment references, keyed by model, so the
    /// planner can silently add it to that model's CTE projection even when
    /// not requested as an output dimension (spec.md §4.4).
    pub fn referenced_columns(fragment: &str) -> Vec<(Option<String>, String)> {
        let Ok(expr) = sql_ast::parse(fragment, crate::dialect::DialectKind::Postgres) else {
            return Vec::new();
        };
        sql_ast::collect_identifiers(&expr)
            .into_iter()
            .map(|ident| match ident.split_once('.') {
                Some((model, field)) => (Some(model.to_string()), field.to_string()),
                None => (None, ident),
            })
            .collect()
    }
}
