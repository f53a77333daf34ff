//! End-to-end compile scenarios against the public API, covering the six
//! cases spec.md §8 calls out explicitly: a single-model aggregate, a
//! two-model join, a three-model multi-hop join, a metric-local filter
//! combined with a query-level filter, a pre-aggregation route, and a
//! pre-aggregation rejection on a finer-than-stored granularity request.

use semlayer::dialect::{DialectKind, DuckDbDialect};
use semlayer::graph::GraphBuilder;
use semlayer::model::{Dimension, Metric, PreAggregation, Relationship, TimeGranularity};
use semlayer::request::Request;
use semlayer::{compile, explain, CompilerConfig, Model};

fn config() -> CompilerConfig {
    CompilerConfig::default()
}

fn orders_model() -> Model {
    Model::new("orders")
        .with_table("public.orders")
        .with_primary_key(vec!["order_id".into()])
        .with_dimension(Dimension::categorical("status"))
        .with_dimension(
            Dimension::time("order_date", TimeGranularity::Day)
                .with_supported_granularities(vec![TimeGranularity::Month]),
        )
        .with_metric(Metric::sum("revenue", "order_amount"))
        .with_metric(
            Metric::sum("completed_revenue", "order_amount")
                .with_filter("{model}.status = 'completed'"),
        )
}

#[test]
fn basic_aggregate_grouped_by_dimension() {
    let graph = GraphBuilder::new().add_model(orders_model()).build().unwrap();
    let request = Request::new(DialectKind::DuckDb)
        .with_dimension("orders.status")
        .with_metric("orders.revenue");

    let sql = compile(&graph, &request, &DuckDbDialect, &config()).unwrap();

    assert!(sql.contains("WITH orders_cte AS"));
    assert!(sql.contains("orders_cte.status AS status"));
    assert!(sql.contains("AS revenue"));
    assert!(sql.contains("GROUP BY orders_cte.status"));
    assert!(!sql.contains("JOIN"));
}

#[test]
fn two_model_join_pulls_dimension_from_related_model() {
    let customers = Model::new("customers")
        .with_table("public.customers")
        .with_primary_key(vec!["customer_id".into()])
        .with_dimension(Dimension::categorical("region"));

    let orders = orders_model().with_relationship(
        Relationship::many_to_one("customers").with_keys("customer_id", "customer_id"),
    );

    let graph = GraphBuilder::new()
        .add_model(orders)
        .add_model(customers)
        .build()
        .unwrap();

    let request = Request::new(DialectKind::DuckDb)
        .with_dimension("customers.region")
        .with_metric("orders.revenue");

    let sql = compile(&graph, &request, &DuckDbDialect, &config()).unwrap();

    assert!(sql.contains("WITH orders_cte AS"));
    assert!(sql.contains("customers_cte AS"));
    assert!(sql.contains("LEFT JOIN customers_cte ON orders_cte.customer_id = customers_cte.customer_id"));
    assert!(sql.contains("customers_cte.region AS region"));
}

#[test]
fn three_model_multi_hop_pulls_in_intermediate_model() {
    let regions = Model::new("regions")
        .with_table("public.regions")
        .with_primary_key(vec!["region_id".into()])
        .with_dimension(Dimension::categorical("region_name"));

    let customers = Model::new("customers")
        .with_table("public.customers")
        .with_primary_key(vec!["customer_id".into()])
        .with_dimension(Dimension::categorical("region"))
        .with_relationship(Relationship::many_to_one("regions").with_keys("region_id", "region_id"));

    let orders = orders_model().with_relationship(
        Relationship::many_to_one("customers").with_keys("customer_id", "customer_id"),
    );

    let graph = GraphBuilder::new()
        .add_model(orders)
        .add_model(customers)
        .add_model(regions)
        .build()
        .unwrap();

    let request = Request::new(DialectKind::DuckDb)
        .with_dimension("regions.region_name")
        .with_metric("orders.revenue");

    let sql = compile(&graph, &request, &DuckDbDialect, &config()).unwrap();

    // customers is never output but must still appear as a CTE and a join
    // hop, since it sits on the only path from orders to regions.
    assert!(sql.contains("customers_cte AS"));
    assert!(sql.contains("regions_cte AS"));
    assert!(sql.contains("LEFT JOIN customers_cte ON orders_cte.customer_id = customers_cte.customer_id"));
    assert!(sql.contains("LEFT JOIN regions_cte ON customers_cte.region_id = regions_cte.region_id"));
    assert!(sql.contains("regions_cte.region_name AS region_name"));
}

#[test]
fn metric_local_filter_and_query_level_filter_land_in_different_places() {
    let graph = GraphBuilder::new().add_model(orders_model()).build().unwrap();

    // orders.status is a plain dimension column, not a requested metric
    // output, so this predicate is CTE pushdown on the orders model.
    let request = Request::new(DialectKind::DuckDb)
        .with_dimension("orders.status")
        .with_metric("orders.completed_revenue")
        .with_filter("orders.status != 'cancelled'");

    let sql = compile(&graph, &request, &DuckDbDialect, &config()).unwrap();

    // the metric's own filter renders as a CASE WHEN inside the raw column,
    // never as a WHERE/HAVING predicate.
    assert!(sql.contains("CASE WHEN orders.status = 'completed' THEN order_amount END AS completed_revenue_raw"));
    // the query-level filter is pushed into the same model's CTE WHERE.
    assert!(sql.contains("WHERE orders.status != 'cancelled'"));
}

fn events_model_with_rollup() -> Model {
    Model::new("events")
        .with_table("public.events")
        .with_primary_key(vec!["event_id".into()])
        .with_dimension(Dimension::categorical("event_type"))
        .with_dimension(
            Dimension::time("event_date", TimeGranularity::Day)
                .with_supported_granularities(vec![TimeGranularity::Week, TimeGranularity::Month]),
        )
        .with_metric(Metric::count("event_count"))
        .with_pre_aggregation(
            PreAggregation::new("daily_by_type")
                .with_measures(vec!["event_count".into()])
                .with_dimensions(vec!["event_type".into()])
                .with_time("event_date", TimeGranularity::Day),
        )
}

#[test]
fn compatible_request_routes_through_pre_aggregation() {
    let graph = GraphBuilder::new().add_model(events_model_with_rollup()).build().unwrap();
    let request = Request::new(DialectKind::DuckDb)
        .with_dimension("events.event_type")
        .with_dimension("events.event_date__month")
        .with_metric("events.event_count");

    let plan = explain(&graph, &request, &DuckDbDialect, &config()).unwrap();

    assert_eq!(
        plan.used_preaggregation,
        Some(("events".to_string(), "daily_by_type".to_string()))
    );
    assert!(plan.sql.contains("events_preagg_daily_by_type"));
    assert!(plan.sql.contains("routed via pre-aggregation daily_by_type"));
}

#[test]
fn week_rollup_is_rejected_for_a_month_request() {
    let mut model = events_model_with_rollup();
    model.pre_aggregations[0].granularity = Some(TimeGranularity::Week);
    let graph = GraphBuilder::new().add_model(model).build().unwrap();

    let request = Request::new(DialectKind::DuckDb)
        .with_dimension("events.event_date__month")
        .with_metric("events.event_count");

    let plan = explain(&graph, &request, &DuckDbDialect, &config()).unwrap();

    assert!(plan.used_preaggregation.is_none());
    assert!(!plan.sql.contains("events_preagg"));
    let (_, reports) = &plan.preagg_reports[0];
    let report = reports.iter().find(|r| r.rollup_name == "daily_by_type").unwrap();
    assert!(!report.eligible);
    assert!(report
        .checks
        .iter()
        .any(|c| c.check == "granularity" && !c.passed));
}
