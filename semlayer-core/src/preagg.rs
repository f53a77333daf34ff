//! The pre-aggregation matcher (spec.md §4.6): decides whether a candidate
//! rollup can answer a request, scores eligible candidates, and exposes an
//! `explain` form reporting each check's outcome for [`crate::compile::explain`].

use crate::dialect::DialectKind;
use crate::filters::FilterClassifier;
use crate::model::{Aggregation, MetricKind, Model, PreAggregation, TimeGranularity};
use crate::request::Request;

/// The outcome of one eligibility check against one candidate rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub check: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// A full eligibility report for one candidate, independent of whether it
/// was ultimately selected.
#[derive(Debug, Clone)]
pub struct CandidateReport {
    pub rollup_name: String,
    pub eligible: bool,
    pub checks: Vec<CheckResult>,
}

/// The result of running the matcher against every rollup on a model.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub selected: Option<String>,
    pub reports: Vec<CandidateReport>,
}

impl MatchOutcome {
    pub fn rejection_reason(&self) -> Option<String> {
        if self.selected.is_some() {
            return None;
        }
        self.reports
            .iter()
            .flat_map(|r| r.checks.iter())
            .find(|c| !c.passed)
            .map(|c| format!("{}: {}", c.check, c.detail))
    }
}

/// Evaluate every pre-aggregation on `model` against `request` and pick the
/// best eligible one, per the scoring rule in spec.md §4.6: exact
/// granularity match, then fewest extra dimensions, then encounter order.
pub fn match_preaggregation(
    model: &Model,
    request: &Request,
    requested_dims: &[(String, Option<TimeGranularity>)],
    requested_metrics: &[(String, Aggregation, Option<String>)],
    touches_single_model: bool,
) -> MatchOutcome {
    if request.use_preaggregations == Some(false) {
        return MatchOutcome::default();
    }

    let mut reports = Vec::new();
    let mut best: Option<(usize, &PreAggregation, Option<TimeGranularity>)> = None;

    for rollup in &model.pre_aggregations {
        let (eligible, checks, matched_grain) =
            evaluate_candidate(model, rollup, request, requested_dims, requested_metrics, touches_single_model);
        reports.push(CandidateReport {
            rollup_name: rollup.name.clone(),
            eligible,
            checks,
        });
        if eligible {
            let extra_dims = rollup.dimensions.len();
            let exact_grain = matched_grain == rollup.granularity;
            let score = (if exact_grain { 0 } else { 1 }, extra_dims);
            let current_score = best
                .as_ref()
                .map(|(_, r, g)| (if *g == r.granularity { 0 } else { 1 }, r.dimensions.len()));
            if current_score.is_none() || score < current_score.unwrap() {
                best = Some((reports.len() - 1, rollup, matched_grain));
            }
        }
    }

    MatchOutcome {
        selected: best.map(|(_, r, _)| r.name.clone()),
        reports,
    }
}

fn evaluate_candidate(
    model: &Model,
    rollup: &PreAggregation,
    request: &Request,
    requested_dims: &[(String, Option<TimeGranularity>)],
    requested_metrics: &[(String, Aggregation, Option<String>)],
    touches_single_model: bool,
) -> (bool, Vec<CheckResult>, Option<TimeGranularity>) {
    let mut checks = Vec::new();
    let mut ok = true;
    let mut matched_grain = None;

    if touches_single_model {
        checks.push(CheckResult {
            check: "single_model",
            passed: true,
            detail: "request touches exactly one model".to_string(),
        });
    } else {
        ok = false;
        checks.push(CheckResult {
            check: "single_model",
            passed: false,
            detail: "request spans more than one model".to_string(),
        });
    }

    // Dimensions: every requested dimension (other than the rollup's own
    // time dimension) must be retained by the rollup.
    let mut missing_dims = Vec::new();
    let mut requested_grain: Option<TimeGranularity> = None;
    for (dim_name, grain) in requested_dims {
        if Some(dim_name.as_str()) == rollup.time_dimension.as_deref() {
            requested_grain = *grain;
            continue;
        }
        if !rollup.dimensions.contains(dim_name) {
            missing_dims.push(dim_name.clone());
        }
    }
    if missing_dims.is_empty() {
        checks.push(CheckResult {
            check: "dimensions",
            passed: true,
            detail: "all requested dimensions present in rollup".to_string(),
        });
    } else {
        ok = false;
        checks.push(CheckResult {
            check: "dimensions",
            passed: false,
            detail: format!("missing dimensions: {}", missing_dims.join(", ")),
        });
    }

    // Granularity: finer-or-equal never derivable; week is never compatible
    // with month/quarter/year.
    if let (Some(requested), Some(base)) = (requested_grain, rollup.granularity) {
        matched_grain = Some(requested);
        if requested.compatible_with(base) {
            checks.push(CheckResult {
                check: "granularity",
                passed: true,
                detail: format!("{requested} derivable from rollup grain {base}"),
            });
        } else {
            ok = false;
            checks.push(CheckResult {
                check: "granularity",
                passed: false,
                detail: format!("{requested} not derivable from rollup grain {base}"),
            });
        }
    }

    // Measures: every requested metric must be directly derivable from the
    // rollup's materialised measures.
    let mut undeliverable = Vec::new();
    for (metric_name, agg, sql) in requested_metrics {
        let derivable = match agg {
            Aggregation::Sum | Aggregation::Min | Aggregation::Max | Aggregation::Count => {
                rollup.measures.iter().any(|m| m == metric_name)
            }
            Aggregation::Avg => {
                rollup.measures.iter().any(|m| m == metric_name)
                    || avg_is_derivable(model, rollup, sql.as_deref())
            }
            Aggregation::CountDistinct => false,
            _ => rollup.measures.iter().any(|m| m == metric_name),
        };
        if !derivable {
            undeliverable.push(metric_name.clone());
        }
    }
    if undeliverable.is_empty() {
        checks.push(CheckResult {
            check: "measures",
            passed: true,
            detail: "all requested metrics derivable from rollup measures".to_string(),
        });
    } else {
        ok = false;
        checks.push(CheckResult {
            check: "measures",
            passed: false,
            detail: format!("not derivable: {}", undeliverable.join(", ")),
        });
    }

    // Filters: every column referenced in the request's filters must be
    // present in the rollup (dimension or time dimension).
    let mut missing_filter_cols = Vec::new();
    for filter in &request.filters {
        for (owner, col) in FilterClassifier::referenced_columns(filter) {
            if let Some(owner) = &owner {
                if owner != &model.name {
                    continue;
                }
            }
            let available = rollup.dimensions.contains(&col)
                || Some(col.as_str()) == rollup.time_dimension.as_deref()
                || model.primary_key.contains(&col);
            if !available {
                missing_filter_cols.push(col);
            }
        }
    }
    if missing_filter_cols.is_empty() {
        checks.push(CheckResult {
            check: "filters",
            passed: true,
            detail: "all filter columns available in rollup".to_string(),
        });
    } else {
        ok = false;
        checks.push(CheckResult {
            check: "filters",
            passed: false,
            detail: format!("missing filter columns: {}", missing_filter_cols.join(", ")),
        });
    }

    (ok, checks, matched_grain)
}

/// spec.md §4.6 point 4: `avg(x)` is only derivable from a rollup that
/// separately materialises a `sum` over the *same* underlying column and a
/// plain row count — not just any measure whose name happens to end in
/// `_count`.
fn avg_is_derivable(model: &Model, rollup: &PreAggregation, averaged_column: Option<&str>) -> bool {
    let has_matching_sum = model.metrics.iter().any(|m| {
        rollup.measures.iter().any(|rm| rm == &m.name)
            && matches!(
                &m.kind,
                MetricKind::Aggregate { agg: Aggregation::Sum, sql } if sql.as_deref() == averaged_column
            )
    });
    let has_count = model.metrics.iter().any(|m| {
        rollup.measures.iter().any(|rm| rm == &m.name)
            && matches!(&m.kind, MetricKind::Aggregate { agg: Aggregation::Count, .. })
    });
    has_matching_sum && has_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dimension;

    fn events_model() -> Model {
        Model::new("events")
            .with_table("public.events")
            .with_dimension(Dimension::categorical("event_type"))
            .with_dimension(
                Dimension::time("event_date", TimeGranularity::Day)
                    .with_supported_granularities(vec![TimeGranularity::Month]),
            )
            .with_metric(crate::model::Metric::count("event_count"))
            .with_metric(crate::model::Metric::sum("total_amount", "amount"))
            .with_pre_aggregation(
                PreAggregation::new("daily_by_type")
                    .with_measures(vec!["event_count".into(), "total_amount".into()])
                    .with_dimensions(vec!["event_type".into()])
                    .with_time("event_date", TimeGranularity::Day),
            )
    }

    #[test]
    fn selects_rollup_when_month_is_coarser_than_day() {
        let model = events_model();
        let request = Request::new(DialectKind::DuckDb);
        let outcome = match_preaggregation(
            &model,
            &request,
            &[("event_type".into(), None), ("event_date".into(), Some(TimeGranularity::Month))],
            &[
                ("event_count".into(), Aggregation::Count, None),
                ("total_amount".into(), Aggregation::Sum, None),
            ],
            true,
        );
        assert_eq!(outcome.selected.as_deref(), Some("daily_by_type"));
    }

    #[test]
    fn rejects_week_rollup_for_month_request() {
        let mut model = events_model();
        model.pre_aggregations[0].granularity = Some(TimeGranularity::Week);
        let request = Request::new(DialectKind::DuckDb);
        let outcome = match_preaggregation(
            &model,
            &request,
            &[("event_date".into(), Some(TimeGranularity::Month))],
            &[("event_count".into(), Aggregation::Count, None)],
            true,
        );
        assert!(outcome.selected.is_none());
        assert!(outcome.rejection_reason().unwrap().contains("granularity"));
    }

    #[test]
    fn avg_without_matching_sum_measure_is_rejected() {
        let mut model = events_model();
        // "avg_amount" averages the same column as "total_amount", but the
        // rollup below only materialises "event_count" — no sum measure at
        // all, matching or otherwise.
        model = model.with_metric(crate::model::Metric::new(
            "avg_amount",
            crate::model::MetricKind::Aggregate {
                agg: Aggregation::Avg,
                sql: Some("amount".into()),
            },
        ));
        model.pre_aggregations[0].measures = vec!["event_count".into()];
        let request = Request::new(DialectKind::DuckDb);
        let outcome = match_preaggregation(
            &model,
            &request,
            &[("event_type".into(), None)],
            &[("avg_amount".into(), Aggregation::Avg, Some("amount".into()))],
            true,
        );
        assert!(outcome.selected.is_none());
        assert!(outcome.rejection_reason().unwrap().contains("measures"));
    }

    #[test]
    fn avg_with_matching_sum_and_count_measures_is_accepted() {
        let mut model = events_model();
        model = model.with_metric(crate::model::Metric::new(
            "avg_amount",
            crate::model::MetricKind::Aggregate {
                agg: Aggregation::Avg,
                sql: Some("amount".into()),
            },
        ));
        // "total_amount" is sum(amount) and "event_count" is a plain count —
        // together they derive avg(amount).
        model.pre_aggregations[0].measures = vec!["total_amount".into(), "event_count".into()];
        let request = Request::new(DialectKind::DuckDb);
        let outcome = match_preaggregation(
            &model,
            &request,
            &[("event_type".into(), None)],
            &[("avg_amount".into(), Aggregation::Avg, Some("amount".into()))],
            true,
        );
        assert_eq!(outcome.selected.as_deref(), Some("daily_by_type"));
    }

    #[test]
    fn count_distinct_always_disqualifies() {
        let model = events_model();
        let request = Request::new(DialectKind::DuckDb);
        let outcome = match_preaggregation(
            &model,
            &request,
            &[("event_type".into(), None)],
            &[("unique_users".into(), Aggregation::CountDistinct, None)],
            true,
        );
        assert!(outcome.selected.is_none());
    }
}
