//! The metric resolver (spec.md §4.3): given the metrics a request asks
//! for, produces a dependency-ordered [`MetricPlan`] — the base aggregates
//! each model's CTE must materialise, plus the final projection layer that
//! computes ratios, derived formulas, cumulative windows and time
//! comparisons on top of them.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::{CompileError, Result};
use crate::graph::SemanticGraph;
use crate::model::{Aggregation, Metric, MetricKind, Model, TimeGranularity};
use crate::sql_ast;

/// A base aggregate a model's CTE must project as `<name>_raw`, re-aggregated
/// by the outer `AGG(cte.<name>_raw)`.
#[derive(Debug, Clone)]
pub struct BaseAggregate {
    pub name: String,
    pub agg: Aggregation,
    /// The expression aggregated over the model's base row. `1` for a bare
    /// `count()`; the model's primary-key expression for `count_distinct`
    /// with no `sql`.
    pub inner_sql: String,
    /// Metric-local filters (CASE WHEN), never routed to WHERE/HAVING.
    pub filters: Vec<String>,
}

/// The window/frame shape of a cumulative metric (spec.md §4.3).
#[derive(Debug, Clone)]
pub enum CumulativeFrame {
    RowsPreceding(i64),
    RangeInterval(i64, TimeGranularity),
    GrainToDate(TimeGranularity),
    Unbounded,
}

/// One item of the final (post-GROUP-BY) projection layer.
#[derive(Debug, Clone)]
pub enum ProjectionItem {
    /// Pass a base aggregate straight through as an output column.
    BaseAggregate { name: String, model: String },
    Ratio {
        name: String,
        numerator_col: String,
        denominator_col: String,
    },
    /// `sql` is the metric's formula text with dependency names still
    /// present as identifiers; the planner substitutes each with its
    /// computed column reference via [`sql_ast::rewrite_identifiers`].
    Derived { name: String, sql: String, depends_on: Vec<String> },
    Cumulative {
        name: String,
        base_col: String,
        time_dim: String,
        frame: CumulativeFrame,
    },
    TimeComparison {
        name: String,
        base_metric: String,
        comparison_type: String,
    },
    Conversion {
        name: String,
        entity: String,
        base_event: String,
        conversion_event: String,
        conversion_window: String,
    },
}

impl ProjectionItem {
    pub fn name(&self) -> &str {
        match self {
            ProjectionItem::BaseAggregate { name, .. }
            | ProjectionItem::Ratio { name, .. }
            | ProjectionItem::Derived { name, .. }
            | ProjectionItem::Cumulative { name, .. }
            | ProjectionItem::TimeComparison { name, .. }
            | ProjectionItem::Conversion { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricPlan {
    /// Base aggregates each model's CTE must project, in resolution order.
    pub base_aggregates: BTreeMap<String, Vec<BaseAggregate>>,
    /// Final projection items, request order for directly requested
    /// metrics, then any dependency closure in topological order.
    pub projection: Vec<ProjectionItem>,
}

struct ResolverCtx<'a> {
    graph: &'a SemanticGraph,
    plan: MetricPlan,
    /// metric output name -> owning model (`None` for graph-level), used to
    /// avoid re-resolving an already-seen metric.
    seen: HashMap<String, Option<String>>,
}

/// Resolve a metric reference to its canonical `owner.name` identity (bare
/// `name` for a graph-level metric), so two textually different references
/// to the same underlying metric (e.g. a qualified `"orders.revenue"`
/// alongside an unqualified dependency reference `"revenue"`) collapse to
/// one node instead of being treated as distinct metrics.
fn canonical_metric_ref(graph: &SemanticGraph, reference: &str) -> Result<String> {
    let (owner, metric) = graph.resolve_metric(reference)?;
    Ok(match owner {
        Some(model) => format!("{model}.{}", metric.name),
        None => metric.name.clone(),
    })
}

/// Resolve the requested metrics (in request order) into a [`MetricPlan`].
pub fn resolve(requested: &[String], graph: &SemanticGraph) -> Result<MetricPlan> {
    let mut ctx = ResolverCtx {
        graph,
        plan: MetricPlan::default(),
        seen: HashMap::new(),
    };

    // Dependency extraction + cycle detection up front, over the full
    // transitive closure, so a self-reference is reported before any
    // partial plan is built. Every node is keyed by its canonical
    // `owner.name` identity rather than the raw reference string, so a
    // metric requested both directly and as a dependency under a different
    // spelling is only visited once.
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut queue_order: Vec<String> = Vec::new();
    let mut to_visit: VecDeque<String> = VecDeque::new();
    for name in requested {
        to_visit.push_back(canonical_metric_ref(graph, name)?);
    }
    let mut visited: HashSet<String> = HashSet::new();

    while let Some(name) = to_visit.pop_front() {
        if !visited.insert(name.clone()) {
            continue;
        }
        queue_order.push(name.clone());
        in_degree.entry(name.clone()).or_insert(0);
        let (_, metric) = graph.resolve_metric(&name)?;
        let deps = metric_dependencies(metric);
        for dep in &deps {
            let dep = canonical_metric_ref(graph, dep)?;
            edges.entry(dep.clone()).or_default().push(name.clone());
            *in_degree.entry(name.clone()).or_insert(0) += 1;
            if !visited.contains(&dep) {
                to_visit.push_back(dep);
            }
        }
    }

    let topo = kahn_topological_order(&queue_order, &in_degree, &edges)?;

    for name in &topo {
        resolve_one(&mut ctx, name)?;
    }

    // Final projection is ordered: requested metrics first in request
    // order, then any remaining dependency-only metrics in topological
    // order (ties broken by request order, which `topo` already respects
    // since it is a stable extension of `queue_order`).
    let mut projection = Vec::new();
    let mut placed: HashSet<String> = HashSet::new();
    for name in requested {
        if let Some(item) = ctx.plan.projection.iter().find(|p| p.name() == name) {
            projection.push(item.clone());
            placed.insert(name.clone());
        }
    }
    for item in &ctx.plan.projection {
        if !placed.contains(item.name()) {
            projection.push(item.clone());
            placed.insert(item.name().to_string());
        }
    }
    ctx.plan.projection = projection;

    Ok(ctx.plan)
}

/// Kahn's algorithm: process nodes with in-degree 0, decrementing
/// neighbours' in-degree as they're consumed. Any node left unprocessed
/// when the queue empties is part of a cycle.
fn kahn_topological_order(
    all_nodes: &[String],
    in_degree: &HashMap<String, usize>,
    edges: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut remaining = in_degree.clone();
    let mut queue: VecDeque<String> = all_nodes
        .iter()
        .filter(|n| *remaining.get(*n).unwrap_or(&0) == 0)
        .cloned()
        .collect();
    let mut order = Vec::new();

    while let Some(node) = queue.pop_front() {
        order.push(node.clone());
        if let Some(dependents) = edges.get(&node) {
            for dep in dependents {
                if let Some(d) = remaining.get_mut(dep) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(dep.clone());
                    }
                }
            }
        }
    }

    if order.len() != all_nodes.len() {
        let stuck: Vec<String> = all_nodes
            .iter()
            .filter(|n| !order.contains(n))
            .cloned()
            .collect();
        return Err(CompileError::SelfReferentialMetric(stuck.join(", ")));
    }

    Ok(order)
}

/// The metric names `metric` depends on, extracted by parsing its SQL
/// (derived) or reading its declared references (ratio/cumulative/
/// time-comparison), never by substring scanning (spec.md §9).
fn metric_dependencies(metric: &Metric) -> Vec<String> {
    match &metric.kind {
        MetricKind::Aggregate { .. } => Vec::new(),
        MetricKind::Ratio {
            numerator,
            denominator,
        } => vec![numerator.clone(), denominator.clone()],
        MetricKind::Derived { sql } => derived_formula_dependencies(sql),
        MetricKind::Cumulative { sql, .. } => vec![sql.trim().to_string()],
        MetricKind::TimeComparison { base_metric, .. } => vec![base_metric.clone()],
        MetricKind::Conversion { .. } => Vec::new(),
    }
}

fn derived_formula_dependencies(sql: &str) -> Vec<String> {
    match sql_ast::parse(sql, crate::dialect::DialectKind::Postgres) {
        Ok(expr) => sql_ast::collect_identifiers(&expr),
        Err(_) => Vec::new(),
    }
}

fn resolve_one(ctx: &mut ResolverCtx, name: &str) -> Result<()> {
    if ctx.seen.contains_key(name) {
        return Ok(());
    }
    let (owner, metric) = ctx.graph.resolve_metric(name)?;
    ctx.seen.insert(name.to_string(), owner.map(|s| s.to_string()));

    match &metric.kind {
        MetricKind::Aggregate { agg, sql } => {
            let model_name = owner.ok_or_else(|| CompileError::InvalidMetricKind {
                name: name.to_string(),
                reason: "base aggregate metrics must be owned by a model".to_string(),
            })?;
            let model = ctx.graph.get_model(model_name)?;
            let inner_sql = base_aggregate_inner_sql(model, *agg, sql.as_deref());
            ctx.plan
                .base_aggregates
                .entry(model_name.to_string())
                .or_default()
                .push(BaseAggregate {
                    name: metric.name.clone(),
                    agg: *agg,
                    inner_sql,
                    filters: metric.filters.clone(),
                });
            ctx.plan.projection.push(ProjectionItem::BaseAggregate {
                name: metric.name.clone(),
                model: model_name.to_string(),
            });
        }
        MetricKind::Ratio {
            numerator,
            denominator,
        } => {
            let (_, num_metric) = ctx.graph.resolve_metric(numerator)?;
            let (_, den_metric) = ctx.graph.resolve_metric(denominator)?;
            ctx.plan.projection.push(ProjectionItem::Ratio {
                name: metric.name.clone(),
                numerator_col: num_metric.name.clone(),
                denominator_col: den_metric.name.clone(),
            });
        }
        MetricKind::Derived { sql } => {
            let depends_on = derived_formula_dependencies(sql)
                .into_iter()
                .filter_map(|dep| ctx.graph.resolve_metric(&dep).ok())
                .map(|(_, m)| m.name.clone())
                .collect();
            ctx.plan.projection.push(ProjectionItem::Derived {
                name: metric.name.clone(),
                sql: sql.clone(),
                depends_on,
            });
        }
        MetricKind::Cumulative {
            sql,
            window,
            grain_to_date,
        } => {
            let frame = cumulative_frame(window.as_deref(), *grain_to_date);
            let (_, base) = ctx.graph.resolve_metric(sql.trim())?;
            let base_col = base.name.clone();
            let time_dim = owner
                .and_then(|m| ctx.graph.get_model(m).ok())
                .and_then(|m| m.default_time_dimension.clone())
                .unwrap_or_default();
            ctx.plan.projection.push(ProjectionItem::Cumulative {
                name: metric.name.clone(),
                base_col,
                time_dim,
                frame,
            });
        }
        MetricKind::TimeComparison {
            base_metric,
            comparison_type,
        } => {
            let (_, base) = ctx.graph.resolve_metric(base_metric)?;
            ctx.plan.projection.push(ProjectionItem::TimeComparison {
                name: metric.name.clone(),
                base_metric: base.name.clone(),
                comparison_type: comparison_type.clone(),
            });
        }
        MetricKind::Conversion {
            entity,
            base_event,
            conversion_event,
            conversion_window,
        } => {
            ctx.plan.projection.push(ProjectionItem::Conversion {
                name: metric.name.clone(),
                entity: entity.clone(),
                base_event: base_event.clone(),
                conversion_event: conversion_event.clone(),
                conversion_window: conversion_window.clone(),
            });
        }
    }
    Ok(())
}

/// The raw expression a base aggregate's CTE column holds, per spec.md §3
/// "Metric" and §4.7's raw-column scheme.
pub fn base_aggregate_inner_sql(model: &Model, agg: Aggregation, sql: Option<&str>) -> String {
    if let Some(expr) = sql {
        return expr.to_string();
    }
    match agg {
        Aggregation::Count => "1".to_string(),
        Aggregation::CountDistinct => model.primary_key_expr(),
        _ => "1".to_string(),
    }
}

fn cumulative_frame(window: Option<&str>, grain_to_date: Option<TimeGranularity>) -> CumulativeFrame {
    if let Some(g) = grain_to_date {
        return CumulativeFrame::GrainToDate(g);
    }
    if let Some(window) = window {
        let parts: Vec<&str> = window.split_whitespace().collect();
        if let [n_str, unit_str] = parts.as_slice() {
            if let Ok(n) = n_str.parse::<i64>() {
                if let Some(unit) = TimeGranularity::parse(unit_str.trim_end_matches('s')) {
                    if unit == TimeGranularity::Day {
                        return CumulativeFrame::RowsPreceding(n - 1);
                    }
                    return CumulativeFrame::RangeInterval(n, unit);
                }
            }
        }
    }
    CumulativeFrame::Unbounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::model::{Dimension, Metric as M};

    fn simple_graph() -> SemanticGraph {
        let orders = Model::new("orders")
            .with_table("public.orders")
            .with_dimension(Dimension::categorical("status"))
            .with_metric(M::sum("revenue", "order_amount"))
            .with_metric(M::count("order_count"))
            .with_metric(M::ratio("aov", "revenue", "order_count"))
            .with_metric(M::derived("gross_revenue", "revenue * 1.1"))
            .with_metric(M::new(
                "net_of_gross",
                MetricKind::Derived {
                    sql: "gross_revenue - revenue".to_string(),
                },
            ));
        GraphBuilder::new().add_model(orders).build().unwrap()
    }

    #[test]
    fn base_aggregate_resolves_into_cte_bucket() {
        let g = simple_graph();
        let plan = resolve(&["orders.revenue".to_string()], &g).unwrap();
        assert_eq!(plan.base_aggregates["orders"].len(), 1);
        assert_eq!(plan.base_aggregates["orders"][0].inner_sql, "order_amount");
    }

    #[test]
    fn count_with_no_sql_projects_literal_one() {
        let g = simple_graph();
        let plan = resolve(&["orders.order_count".to_string()], &g).unwrap();
        assert_eq!(plan.base_aggregates["orders"][0].inner_sql, "1");
    }

    #[test]
    fn ratio_pulls_in_both_base_metrics() {
        let g = simple_graph();
        let plan = resolve(&["orders.aov".to_string()], &g).unwrap();
        assert_eq!(plan.base_aggregates["orders"].len(), 2);
        assert!(plan
            .projection
            .iter()
            .any(|p| matches!(p, ProjectionItem::Ratio { name, .. } if name == "aov")));
    }

    #[test]
    fn derived_formula_pulls_in_its_dependency() {
        let g = simple_graph();
        let plan = resolve(&["orders.gross_revenue".to_string()], &g).unwrap();
        assert_eq!(plan.base_aggregates["orders"].len(), 1);
        assert!(plan
            .projection
            .iter()
            .any(|p| matches!(p, ProjectionItem::Derived { name, .. } if name == "gross_revenue")));
    }

    #[test]
    fn transitive_derived_dependency_orders_before_dependent() {
        let g = simple_graph();
        let plan = resolve(&["orders.net_of_gross".to_string()], &g).unwrap();
        let names: Vec<&str> = plan.projection.iter().map(|p| p.name()).collect();
        let gross_idx = names.iter().position(|n| *n == "gross_revenue").unwrap();
        let net_idx = names.iter().position(|n| *n == "net_of_gross").unwrap();
        assert!(gross_idx < net_idx);
    }

    #[test]
    fn requesting_a_base_metric_alongside_a_dependent_ratio_does_not_duplicate_it() {
        let g = simple_graph();
        // "orders.revenue" is requested directly (qualified) and again
        // transitively as "aov"'s unqualified "revenue" numerator — both
        // references resolve to the same underlying metric and must
        // collapse to a single base aggregate.
        let plan = resolve(
            &["orders.revenue".to_string(), "orders.aov".to_string()],
            &g,
        )
        .unwrap();
        assert_eq!(plan.base_aggregates["orders"].len(), 2);
        assert_eq!(
            plan.base_aggregates["orders"]
                .iter()
                .filter(|b| b.name == "revenue")
                .count(),
            1
        );
        assert_eq!(
            plan.base_aggregates["orders"]
                .iter()
                .filter(|b| b.name == "order_count")
                .count(),
            1
        );
    }

    #[test]
    fn self_referential_metric_is_rejected() {
        let cyclic = Model::new("m").with_metric(M::new(
            "a",
            MetricKind::Derived {
                sql: "b + 1".to_string(),
            },
        ));
        let cyclic = cyclic.with_metric(M::new(
            "b",
            MetricKind::Derived {
                sql: "a + 1".to_string(),
            },
        ));
        let g = GraphBuilder::new().add_model(cyclic).build().unwrap();
        let err = resolve(&["m.a".to_string()], &g).unwrap_err();
        assert!(matches!(err, CompileError::SelfReferentialMetric(_)));
    }
}
