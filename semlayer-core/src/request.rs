//! The compile-time input: a semantic request for metrics/dimensions/filters
//! against a [`crate::graph::SemanticGraph`]. Created per call, never
//! retained (spec.md §3 "Request").

use std::collections::BTreeMap;

use serde_json::Value;

use crate::dialect::DialectKind;

/// One requested dimension reference, e.g. `orders.status` or
/// `events.event_date__month`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionRef(pub String);

/// One requested metric reference, e.g. `orders.revenue` or, for a
/// graph-level metric, an unqualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRef(pub String);

/// A semantic compile request. See spec.md §3 "Request".
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub metrics: Vec<MetricRef>,
    pub dimensions: Vec<DimensionRef>,
    /// Arbitrary SQL boolean fragments; identifiers use qualified names.
    pub filters: Vec<String>,
    /// Qualified segment names, e.g. `orders.completed_only`.
    pub segments: Vec<String>,
    /// Fragments that may reference an output metric or dimension name.
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<u64>,
    /// Emit row-level SQL with no aggregation; suppresses GROUP BY.
    pub ungrouped: bool,
    pub dialect: DialectKind,
    /// `None` defers to the pre-aggregation matcher's own eligibility
    /// checks; `Some(false)` always forces the base-table path.
    pub use_preaggregations: Option<bool>,
    /// Named parameter substitutions for `{param}` placeholders in filter
    /// and segment SQL.
    pub parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByItem {
    pub expr: String,
    pub descending: bool,
}

impl Request {
    pub fn new(dialect: DialectKind) -> Self {
        Request {
            dialect,
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metrics.push(MetricRef(metric.into()));
        self
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimensions.push(DimensionRef(dimension.into()));
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn with_order_by(mut self, expr: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderByItem {
            expr: expr.into(),
            descending,
        });
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ungrouped(mut self) -> Self {
        self.ungrouped = true;
        self
    }

    /// Substitute `{name}` placeholders in `fragment` with the literal form
    /// of `self.parameters[name]`, per spec.md §6.3.
    pub fn substitute_parameters(&self, fragment: &str, dialect: &dyn crate::dialect::Dialect) -> String {
        let mut out = fragment.to_string();
        for (name, value) in &self.parameters {
            let token = format!("{{{name}}}");
            if out.contains(&token) {
                out = out.replace(&token, &dialect.render_literal(value));
            }
        }
        out
    }
}

impl Default for DialectKind {
    fn default() -> Self {
        DialectKind::DuckDb
    }
}
