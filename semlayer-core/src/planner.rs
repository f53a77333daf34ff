//! The query planner (spec.md §4.7): turns a resolved [`MetricPlan`] plus
//! classified filters into per-model CTEs, a join tree, and a final outer
//! SELECT — or, when the pre-aggregation matcher selects a rollup, the
//! same shape read from the rollup table instead of the base tables.

use std::collections::{BTreeMap, BTreeSet};

use crate::dialect::Dialect;
use crate::error::{CompileError, Result};
use crate::filters::{FilterBucket, FilterClassifier};
use crate::graph::SemanticGraph;
use crate::metrics::{self, BaseAggregate, CumulativeFrame, MetricPlan, ProjectionItem};
use crate::model::{Aggregation, DimensionKind, Model, TimeGranularity};
use crate::preagg::{self, CandidateReport};
use crate::request::Request;

/// A resolved dimension reference: owning model, bare name, and the
/// granularity requested (if any, for a time dimension).
#[derive(Debug, Clone)]
struct ResolvedDim {
    model: String,
    name: String,
    grain: Option<TimeGranularity>,
}

/// The fully rendered query, plus routing metadata surfaced by `explain`.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    pub sql: String,
    pub used_preaggregation: Option<(String, String)>,
    pub preagg_reports: Vec<(String, Vec<CandidateReport>)>,
}

pub fn plan(graph: &SemanticGraph, request: &Request, dialect: &dyn Dialect) -> Result<PlannedQuery> {
    let metric_names: Vec<String> = request.metrics.iter().map(|m| m.0.clone()).collect();
    let metric_plan = metrics::resolve(&metric_names, graph)?;

    let mut resolved_dims = Vec::new();
    for d in &request.dimensions {
        let (model, name, grain) = graph.resolve_dimension_ref(&d.0)?;
        resolved_dims.push(ResolvedDim {
            model: model.to_string(),
            name: name.to_string(),
            grain,
        });
    }

    // A model's `default_time_dimension`/`default_grain` routing hint
    // (spec.md §3 "Model"): when the request has no explicit time dimension
    // at all and it references metrics owned by a model declaring a
    // default, inject that dimension at its default grain so time-bucketed
    // output happens without the caller spelling it out.
    let request_has_time_dim = resolved_dims.iter().any(|d| {
        graph
            .get_model(&d.model)
            .ok()
            .and_then(|m| m.get_dimension(&d.name))
            .map(|dim| dim.kind == DimensionKind::Time)
            .unwrap_or(false)
    });
    if !request_has_time_dim {
        for model_name in metric_plan.base_aggregates.keys() {
            let model = graph.get_model(model_name)?;
            let Some(default_dim_name) = &model.default_time_dimension else {
                continue;
            };
            let Some(dim) = model.get_dimension(default_dim_name) else {
                continue;
            };
            let grain = model.default_grain.or(dim.granularity);
            resolved_dims.push(ResolvedDim {
                model: model_name.clone(),
                name: default_dim_name.clone(),
                grain,
            });
        }
    }

    let mut touched_models: BTreeSet<String> = BTreeSet::new();
    touched_models.extend(metric_plan.base_aggregates.keys().cloned());
    touched_models.extend(resolved_dims.iter().map(|d| d.model.clone()));
    if touched_models.is_empty() {
        return Err(CompileError::InvalidRequest(
            "request has no metrics or dimensions".to_string(),
        ));
    }

    // Primary model: owns the most requested (directly, not dependency-
    // pulled) metrics; ties broken by encounter order in request.metrics.
    let primary = pick_primary_model(graph, request, &touched_models)?;

    // Join edges needed to reach every other touched model from primary,
    // deduplicated and in discovery order; this also pulls in any
    // intermediate model on a multi-hop path even if it contributes no
    // output column (spec.md §8 scenario 3).
    let mut join_edges = Vec::new();
    let mut models_in_plan: BTreeSet<String> = BTreeSet::new();
    models_in_plan.insert(primary.clone());
    for model in &touched_models {
        if model == &primary {
            continue;
        }
        let path = graph.find_relationship_path(&primary, model)?;
        for edge in path {
            if !models_in_plan.contains(&edge.to_model) {
                models_in_plan.insert(edge.to_model.clone());
            }
            join_edges.push(edge);
        }
    }

    let requested_metric_names: BTreeSet<String> = metric_plan
        .projection
        .iter()
        .map(|p| p.name().to_string())
        .collect();

    // Filter classification happens once, against the full requested-
    // metric-name set (HAVING detection) — each fragment is relative-date
    // expanded first.
    let classifier = FilterClassifier {
        requested_metric_names: &requested_metric_names,
        dialect,
    };
    let mut cte_pushdown: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut having: Vec<String> = Vec::new();
    let mut outer_where: Vec<String> = Vec::new();
    for fragment in &request.filters {
        let substituted = request.substitute_parameters(fragment, dialect);
        match classifier.classify(&substituted) {
            FilterBucket::CtePushdown { model, sql } => {
                cte_pushdown.entry(model).or_default().push(sql);
            }
            FilterBucket::Having { sql } => {
                if request.ungrouped {
                    return Err(CompileError::InvalidRequest(
                        "HAVING predicates are not valid in ungrouped mode".to_string(),
                    ));
                }
                having.push(sql);
            }
            FilterBucket::OuterWhere { sql } => outer_where.push(sql),
        }
    }

    // Segment predicates are scoped to one model and behave like CTE
    // pushdown filters once `{model}` is substituted.
    for seg_ref in &request.segments {
        let (model_name, seg_name) = SemanticGraph::parse_qualified(seg_ref)
            .ok_or_else(|| CompileError::UnknownSegment(seg_ref.clone()))?;
        let model = graph.get_model(model_name)?;
        let segment = model
            .get_segment(seg_name)
            .ok_or_else(|| CompileError::UnknownSegment(seg_ref.clone()))?;
        let sql = segment.sql.replace("{model}", model_name);
        let sql = request.substitute_parameters(&sql, dialect);
        cte_pushdown.entry(model_name.to_string()).or_default().push(sql);
    }

    // Pre-aggregation routing only applies to a single-model request whose
    // metrics are all plain aggregates.
    let mut preagg_reports = Vec::new();
    let mut used_preaggregation = None;
    let mut preagg_table: BTreeMap<String, (String, crate::model::PreAggregation)> = BTreeMap::new();
    if models_in_plan.len() == 1 {
        let model_name = models_in_plan.iter().next().unwrap().clone();
        let model = graph.get_model(&model_name)?;
        if !model.pre_aggregations.is_empty() {
            let requested_metrics_for_model: Vec<(String, Aggregation, Option<String>)> =
                requested_aggregate_metrics(model, &metric_plan);
            let dims_for_model: Vec<(String, Option<TimeGranularity>)> = resolved_dims
                .iter()
                .filter(|d| d.model == model_name)
                .map(|d| (d.name.clone(), d.grain))
                .collect();
            let outcome = preagg::match_preaggregation(
                model,
                request,
                &dims_for_model,
                &requested_metrics_for_model,
                true,
            );
            preagg_reports.push((model_name.clone(), outcome.reports.clone()));
            if let Some(name) = outcome.selected {
                let rollup = model.get_pre_aggregation(&name).unwrap().clone();
                used_preaggregation = Some((model_name.clone(), name.clone()));
                preagg_table.insert(model_name.clone(), (name, rollup));
            }
        }
    }

    // Output aliasing: collect every candidate output field, count bare-name
    // collisions, and assign the final alias.
    let mut bare_name_counts: BTreeMap<String, usize> = BTreeMap::new();
    for d in &resolved_dims {
        *bare_name_counts.entry(dim_bare_output_name(d)).or_insert(0) += 1;
    }
    for item in &metric_plan.projection {
        *bare_name_counts.entry(item.name().to_string()).or_insert(0) += 1;
    }
    let alias_for_dim = |d: &ResolvedDim| -> String {
        let bare = dim_bare_output_name(d);
        if bare_name_counts[&bare] > 1 {
            format!("{}_{}", d.model, bare)
        } else {
            bare
        }
    };

    // Build one CTE per model in the plan.
    let mut cte_sqls = Vec::new();
    let mut join_columns_needed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for edge in &join_edges {
        join_columns_needed
            .entry(edge.from_model.clone())
            .or_default()
            .insert(edge.from_column.clone());
        join_columns_needed
            .entry(edge.to_model.clone())
            .or_default()
            .insert(edge.to_column.clone());
    }

    for model_name in &models_in_plan {
        let model = graph.get_model(model_name)?;
        let dims_here: Vec<&ResolvedDim> = resolved_dims.iter().filter(|d| &d.model == model_name).collect();
        let raws = metric_plan
            .base_aggregates
            .get(model_name)
            .cloned()
            .unwrap_or_default();
        let pushdowns = cte_pushdown.get(model_name).cloned().unwrap_or_default();
        let rollup = preagg_table.get(model_name);

        let cte_sql = if let Some((rollup_name, rollup_def)) = rollup {
            render_rollup_cte(model, rollup_name, rollup_def, &dims_here, &raws, dialect)
        } else {
            render_base_cte(
                model,
                &dims_here,
                &raws,
                join_columns_needed.get(model_name).cloned().unwrap_or_default(),
                &pushdowns,
                dialect,
            )
        };
        cte_sqls.push(cte_sql);
    }

    // Base-aggregate expressions, keyed by metric name, for the final
    // projection layer (ratios/derived reference these; cumulative/time-
    // comparison reference the grouped query's aliases instead).
    let mut base_expr: BTreeMap<String, String> = BTreeMap::new();
    for item in &metric_plan.projection {
        if let ProjectionItem::BaseAggregate { name, model } = item {
            let agg = metric_plan.base_aggregates[model]
                .iter()
                .find(|b| &b.name == name)
                .expect("base aggregate present for its own projection item");
            let raw_ref = format!("{}_cte.{}_raw", model, name);
            base_expr.insert(name.clone(), render_outer_aggregate(dialect, agg.agg, &raw_ref));
        }
    }

    let needs_window_layer = metric_plan
        .projection
        .iter()
        .any(|p| matches!(p, ProjectionItem::Cumulative { .. } | ProjectionItem::TimeComparison { .. }));

    // Outer SELECT list: dimensions first, then metrics, in request order.
    let mut select_items: Vec<String> = Vec::new();
    let mut group_by_cols: Vec<String> = Vec::new();
    for d in &resolved_dims {
        let col_ref = format!("{}_cte.{}", d.model, dim_cte_column_name(d));
        let alias = alias_for_dim(d);
        select_items.push(format!("{col_ref} AS {alias}"));
        group_by_cols.push(col_ref);
    }

    for item in &metric_plan.projection {
        match item {
            ProjectionItem::BaseAggregate { name, .. } => {
                select_items.push(format!("{} AS {name}", base_expr[name]));
            }
            ProjectionItem::Ratio {
                name,
                numerator_col,
                denominator_col,
            } => {
                let num = base_expr.get(numerator_col).cloned().unwrap_or_else(|| numerator_col.clone());
                let den = base_expr.get(denominator_col).cloned().unwrap_or_else(|| denominator_col.clone());
                let expr = dialect.safe_divide(&num, &den);
                select_items.push(format!("{expr} AS {name}"));
                base_expr.insert(name.clone(), expr);
            }
            ProjectionItem::Derived { name, sql, .. } => {
                let rendered = render_derived_formula(sql, &base_expr);
                select_items.push(format!("{rendered} AS {name}"));
                base_expr.insert(name.clone(), rendered);
            }
            ProjectionItem::Cumulative { .. } | ProjectionItem::TimeComparison { .. } => {
                // handled in the wrapping layer below, once the grouped
                // query's own output aliases are known.
            }
            ProjectionItem::Conversion {
                name,
                base_event,
                conversion_event,
                conversion_window,
                ..
            } => {
                select_items.push(format!(
                    "CAST(SUM(CASE WHEN event_type = '{conversion_event}' THEN 1 ELSE 0 END) AS DOUBLE) \
                     / NULLIF(SUM(CASE WHEN event_type = '{base_event}' THEN 1 ELSE 0 END), 0) AS {name} \
                     /* conversion_window={conversion_window} */"
                ));
            }
        }
    }

    let from_clause = format!("{}_cte", primary);
    let mut join_clauses = Vec::new();
    let mut joined: BTreeSet<String> = BTreeSet::new();
    joined.insert(primary.clone());
    for edge in &join_edges {
        if joined.contains(&edge.to_model) {
            continue;
        }
        join_clauses.push(format!(
            "LEFT JOIN {to}_cte ON {from}_cte.{fc} = {to}_cte.{tc}",
            to = edge.to_model,
            from = edge.from_model,
            fc = edge.from_column,
            tc = edge.to_column
        ));
        joined.insert(edge.to_model.clone());
    }

    let mut sql = format!(
        "WITH {} SELECT {} FROM {}",
        cte_sqls.join(", "),
        select_items.join(", "),
        from_clause
    );
    for j in &join_clauses {
        sql.push(' ');
        sql.push_str(j);
    }
    if !outer_where.is_empty() {
        sql.push_str(&format!(" WHERE {}", outer_where.join(" AND ")));
    }
    if !request.ungrouped && !group_by_cols.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", group_by_cols.join(", ")));
    }
    if !having.is_empty() {
        sql.push_str(&format!(" HAVING {}", having.join(" AND ")));
    }

    if needs_window_layer {
        sql = wrap_with_window_layer(&sql, &metric_plan, &resolved_dims, &alias_for_dim, dialect)?;
    }

    if !request.order_by.is_empty() {
        let orders: Vec<String> = request
            .order_by
            .iter()
            .map(|o| {
                let expr = strip_leading_model_qualifier(&o.expr);
                format!("{expr} {}", if o.descending { "DESC" } else { "ASC" })
            })
            .collect();
        sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
    }
    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok(PlannedQuery {
        sql,
        used_preaggregation,
        preagg_reports,
    })
}

fn requested_aggregate_metrics(
    model: &Model,
    metric_plan: &MetricPlan,
) -> Vec<(String, Aggregation, Option<String>)> {
    let mut out = Vec::new();
    if let Some(raws) = metric_plan.base_aggregates.get(&model.name) {
        for raw in raws {
            out.push((raw.name.clone(), raw.agg, Some(raw.inner_sql.clone())));
        }
    }
    out
}

fn pick_primary_model(
    graph: &SemanticGraph,
    request: &Request,
    touched_models: &BTreeSet<String>,
) -> Result<String> {
    if !request.metrics.is_empty() {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        for m in &request.metrics {
            if let Ok((Some(owner), _)) = graph.resolve_metric(&m.0) {
                *counts.entry(owner.to_string()).or_insert(0) += 1;
                if !order.contains(&owner.to_string()) {
                    order.push(owner.to_string());
                }
            }
        }
        if let Some(best) = order.into_iter().max_by_key(|m| counts.get(m).copied().unwrap_or(0)) {
            return Ok(best);
        }
    }
    touched_models
        .iter()
        .next()
        .cloned()
        .ok_or_else(|| CompileError::InvalidRequest("no model to plan against".to_string()))
}

fn dim_bare_output_name(d: &ResolvedDim) -> String {
    match d.grain {
        Some(g) => format!("{}__{}", d.name, g.as_str()),
        None => d.name.clone(),
    }
}

fn dim_cte_column_name(d: &ResolvedDim) -> String {
    dim_bare_output_name(d)
}

fn render_base_cte(
    model: &Model,
    dims: &[&ResolvedDim],
    raws: &[BaseAggregate],
    join_cols: BTreeSet<String>,
    pushdown_filters: &[String],
    dialect: &dyn Dialect,
) -> String {
    let alias = &model.name;
    let mut projected: BTreeSet<String> = BTreeSet::new();
    let mut columns = Vec::new();

    for pk in &model.primary_key {
        if projected.insert(pk.clone()) {
            columns.push(format!("{pk} AS {pk}"));
        }
    }
    for d in dims {
        let name = dim_cte_column_name(d);
        if !projected.insert(name.clone()) {
            continue;
        }
        let dim = model.get_dimension(&d.name);
        let base_expr = dim.map(|x| x.sql_expr().to_string()).unwrap_or_else(|| d.name.clone());
        let expr = match d.grain {
            Some(g) => dialect.date_trunc(g, &base_expr),
            None => base_expr,
        };
        columns.push(format!("{expr} AS {name}"));
    }
    for col in &join_cols {
        if projected.insert(col.clone()) {
            columns.push(format!("{col} AS {col}"));
        }
    }
    let mut filter_cols: BTreeSet<String> = BTreeSet::new();
    for f in pushdown_filters {
        for (owner, col) in FilterClassifier::referenced_columns(f) {
            if owner.as_deref().is_none() || owner.as_deref() == Some(alias.as_str()) {
                filter_cols.insert(col);
            }
        }
    }
    for col in &filter_cols {
        if projected.insert(col.clone()) {
            columns.push(format!("{col} AS {col}"));
        }
    }
    let mut raw_cols_projected: BTreeSet<String> = BTreeSet::new();
    for raw in raws {
        if !raw_cols_projected.insert(raw.name.clone()) {
            continue;
        }
        let inner = render_raw_metric_inner(raw, alias);
        columns.push(format!("{inner} AS {}_raw", raw.name));
    }

    let mut sql = format!(
        "{alias}_cte AS (SELECT {} FROM {} AS {alias}",
        columns.join(", "),
        model.table_source()
    );
    if !pushdown_filters.is_empty() {
        sql.push_str(&format!(" WHERE {}", pushdown_filters.join(" AND ")));
    }
    sql.push(')');
    sql
}

fn render_raw_metric_inner(raw: &BaseAggregate, model_alias: &str) -> String {
    if raw.filters.is_empty() {
        return raw.inner_sql.clone();
    }
    let conds: Vec<String> = raw
        .filters
        .iter()
        .map(|f| f.replace("{model}", model_alias))
        .collect();
    format!("CASE WHEN {} THEN {} END", conds.join(" AND "), raw.inner_sql)
}

fn render_rollup_cte(
    model: &Model,
    rollup_name: &str,
    rollup: &crate::model::PreAggregation,
    dims: &[&ResolvedDim],
    raws: &[BaseAggregate],
    dialect: &dyn Dialect,
) -> String {
    let alias = &model.name;
    let table = rollup.table_name(&model.name);
    let mut columns = Vec::new();
    for d in dims {
        let name = dim_cte_column_name(d);
        if Some(d.name.as_str()) == rollup.time_dimension.as_deref() {
            let rollup_time_col = rollup.time_column().unwrap_or_else(|| d.name.clone());
            let expr = match d.grain {
                Some(g) => dialect.date_trunc(g, &rollup_time_col),
                None => rollup_time_col,
            };
            columns.push(format!("{expr} AS {name}"));
        } else {
            columns.push(format!("{} AS {name}", d.name));
        }
    }
    for raw in raws {
        let raw_col = crate::model::PreAggregation::raw_column(&raw.name);
        columns.push(format!("{raw_col} AS {}_raw", raw.name));
    }
    format!(
        "{alias}_cte AS (SELECT {} FROM {table} AS {alias}) /* routed via pre-aggregation {rollup_name} */",
        columns.join(", ")
    )
}

fn render_outer_aggregate(dialect: &dyn Dialect, agg: Aggregation, raw_ref: &str) -> String {
    match agg {
        Aggregation::Count => format!("SUM({raw_ref})"),
        other => dialect.render_aggregation(other, raw_ref),
    }
}

fn render_derived_formula(sql: &str, base_expr: &BTreeMap<String, String>) -> String {
    let Ok(expr) = crate::sql_ast::parse(sql, crate::dialect::DialectKind::Postgres) else {
        return sql.to_string();
    };
    let rewritten = crate::sql_ast::rewrite_identifiers(&expr, &mut |name| {
        base_expr.get(name).map(|e| format!("({e})"))
    });
    rewritten.to_string()
}

fn strip_leading_model_qualifier(expr: &str) -> String {
    if let Some((_, rest)) = expr.split_once('.') {
        if !rest.contains(' ') && !rest.contains('(') {
            return rest.to_string();
        }
    }
    expr.to_string()
}

/// Wrap the grouped query as a subquery and add cumulative/time-comparison
/// window expressions in an outer SELECT, since window functions cannot
/// reference the same-level aggregate in every supported dialect
/// (spec.md §4.7).
fn wrap_with_window_layer(
    grouped_sql: &str,
    metric_plan: &MetricPlan,
    resolved_dims: &[ResolvedDim],
    alias_for_dim: &dyn Fn(&ResolvedDim) -> String,
    dialect: &dyn Dialect,
) -> Result<String> {
    let fallback_time_dim_alias = resolved_dims
        .iter()
        .find(|d| d.grain.is_some() || matches!(d.name.as_str(), n if n.ends_with("date") || n.ends_with("_at")))
        .map(alias_for_dim);
    let time_dim_alias_for = |time_dim: &str| -> Option<String> {
        resolved_dims
            .iter()
            .find(|d| d.name == time_dim)
            .map(alias_for_dim)
            .or_else(|| fallback_time_dim_alias.clone())
    };

    let mut outer_cols = vec!["grouped.*".to_string()];
    for item in &metric_plan.projection {
        match item {
            ProjectionItem::Cumulative {
                name,
                base_col,
                frame,
                time_dim,
            } => {
                let order = time_dim_alias_for(time_dim)
                    .map(|c| format!("ORDER BY grouped.{c}"))
                    .unwrap_or_default();
                let frame_sql = match frame {
                    CumulativeFrame::RowsPreceding(n) => {
                        format!("ROWS BETWEEN {n} PRECEDING AND CURRENT ROW")
                    }
                    CumulativeFrame::RangeInterval(n, unit) => {
                        format!("RANGE BETWEEN {} PRECEDING AND CURRENT ROW", dialect.interval(*n, *unit))
                    }
                    CumulativeFrame::GrainToDate(g) => {
                        let partition = time_dim_alias_for(time_dim)
                            .map(|c| format!("PARTITION BY {} ", dialect.date_trunc(*g, &format!("grouped.{c}"))))
                            .unwrap_or_default();
                        outer_cols.push(format!(
                            "SUM(grouped.{base_col}) OVER ({partition}{order}) AS {name}"
                        ));
                        continue;
                    }
                    CumulativeFrame::Unbounded => String::new(),
                };
                outer_cols.push(format!("SUM(grouped.{base_col}) OVER ({order} {frame_sql}) AS {name}"));
            }
            ProjectionItem::TimeComparison {
                name, base_metric, ..
            } => {
                let order = fallback_time_dim_alias
                    .clone()
                    .map(|c| format!("ORDER BY grouped.{c}"))
                    .unwrap_or_default();
                outer_cols.push(format!(
                    "grouped.{base_metric} - LAG(grouped.{base_metric}) OVER ({order}) AS {name}"
                ));
            }
            _ => {}
        }
    }

    Ok(format!(
        "SELECT {} FROM ({grouped_sql}) AS grouped",
        outer_cols.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DialectKind, DuckDbDialect};
    use crate::graph::GraphBuilder;
    use crate::model::{Dimension, Metric};

    #[test]
    fn default_time_dimension_is_injected_when_request_omits_one() {
        let mut orders = Model::new("orders")
            .with_table("public.orders")
            .with_dimension(
                Dimension::time("order_date", TimeGranularity::Day)
                    .with_supported_granularities(vec![TimeGranularity::Month]),
            )
            .with_metric(Metric::sum("revenue", "order_amount"));
        orders.default_time_dimension = Some("order_date".to_string());
        orders.default_grain = Some(TimeGranularity::Month);

        let graph = GraphBuilder::new().add_model(orders).build().unwrap();
        let request = Request::new(DialectKind::DuckDb).with_metric("orders.revenue");

        let planned = plan(&graph, &request, &DuckDbDialect).unwrap();
        assert!(planned.sql.contains("DATE_TRUNC('month', order_date) AS order_date__month"));
        assert!(planned.sql.contains("GROUP BY orders_cte.order_date__month"));
    }

    #[test]
    fn explicit_time_dimension_suppresses_default_injection() {
        let mut orders = Model::new("orders")
            .with_table("public.orders")
            .with_dimension(Dimension::time("order_date", TimeGranularity::Day))
            .with_dimension(Dimension::time("shipped_at", TimeGranularity::Day))
            .with_metric(Metric::sum("revenue", "order_amount"));
        orders.default_time_dimension = Some("order_date".to_string());

        let graph = GraphBuilder::new().add_model(orders).build().unwrap();
        let request = Request::new(DialectKind::DuckDb)
            .with_dimension("orders.shipped_at")
            .with_metric("orders.revenue");

        let planned = plan(&graph, &request, &DuckDbDialect).unwrap();
        assert!(!planned.sql.contains("order_date"));
        assert!(planned.sql.contains("shipped_at"));
    }

    #[test]
    fn base_metric_requested_alongside_its_dependent_ratio_is_not_duplicated() {
        let orders = Model::new("orders")
            .with_table("public.orders")
            .with_metric(Metric::sum("revenue", "order_amount"))
            .with_metric(Metric::count("order_count"))
            .with_metric(Metric::ratio("aov", "revenue", "order_count"));

        let graph = GraphBuilder::new().add_model(orders).build().unwrap();
        let request = Request::new(DialectKind::DuckDb)
            .with_metric("orders.revenue")
            .with_metric("orders.aov");

        let planned = plan(&graph, &request, &DuckDbDialect).unwrap();
        // each raw column is aliased into the CTE's SELECT list exactly
        // once; a resolver or CTE-rendering dedup regression would produce
        // a second "AS ..._raw" for the same column and break the query
        // with an ambiguous-column error at the database.
        assert_eq!(planned.sql.matches("AS revenue_raw").count(), 1);
        assert_eq!(planned.sql.matches("AS order_count_raw").count(), 1);
    }
}
