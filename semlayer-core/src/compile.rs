//! Public entry points: `compile` turns a `(SemanticGraph, Request, Dialect)`
//! triple into SQL text; `explain` runs the same pipeline but returns the
//! intermediate decisions (pre-aggregation eligibility, chosen join path)
//! instead of discarding them.

use std::time::Instant;

use tracing::{info, instrument};

use crate::config::CompilerConfig;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::graph::SemanticGraph;
use crate::planner::{self, PlannedQuery};
use crate::request::Request;
use crate::validation::Validator;

/// Compile `request` against `graph` for `dialect`, returning the rendered
/// SQL. Equivalent to `explain(..)?.sql` but skips building the explain
/// report.
#[instrument(skip(graph, request, dialect, config), fields(metrics = request.metrics.len(), dimensions = request.dimensions.len()))]
pub fn compile(
    graph: &SemanticGraph,
    request: &Request,
    dialect: &dyn Dialect,
    config: &CompilerConfig,
) -> Result<String> {
    let started = Instant::now();
    let plan = run_pipeline(graph, request, dialect, config)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "compiled query");
    Ok(plan.sql)
}

/// The full result of compiling a request: the rendered SQL plus the
/// decisions the planner made along the way, for callers that want to show
/// their work (a `--explain` CLI flag, a debugging UI).
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub sql: String,
    pub used_preaggregation: Option<(String, String)>,
    pub preagg_reports: Vec<(String, Vec<crate::preagg::CandidateReport>)>,
}

/// Run the full pipeline and return every intermediate decision, per
/// spec.md's `explain` requirement.
#[instrument(skip(graph, request, dialect, config), fields(metrics = request.metrics.len(), dimensions = request.dimensions.len()))]
pub fn explain(
    graph: &SemanticGraph,
    request: &Request,
    dialect: &dyn Dialect,
    config: &CompilerConfig,
) -> Result<QueryPlan> {
    let started = Instant::now();
    let plan = run_pipeline(graph, request, dialect, config)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "explained query");
    Ok(QueryPlan {
        sql: plan.sql,
        used_preaggregation: plan.used_preaggregation,
        preagg_reports: plan.preagg_reports,
    })
}

fn run_pipeline(
    graph: &SemanticGraph,
    request: &Request,
    dialect: &dyn Dialect,
    config: &CompilerConfig,
) -> Result<PlannedQuery> {
    Validator::new(config.validation.warn_only).validate(graph)?;

    let mut request = request.clone();
    if request.limit.is_none() && config.query.default_row_limit > 0 {
        request.limit = Some(config.query.default_row_limit);
    }
    if config.query.max_row_limit > 0 {
        if let Some(limit) = request.limit {
            if limit > config.query.max_row_limit {
                request.limit = Some(config.query.max_row_limit);
            }
        }
    }

    planner::plan(graph, &request, dialect)
}
