//! The user-SQL front end (spec.md §4.8): accepts a restricted
//! `SELECT <model>.<ref>, ... FROM <model> [WHERE ...] [ORDER BY ...]
//! [LIMIT n]` query, extracts a [`crate::request::Request`] from it, and
//! delegates to the planner. Joins, subqueries and multi-statement input are
//! rejected as [`CompileError::UnsupportedUserSQL`].

use sqlparser::ast::{
    Expr, OrderByExpr, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::dialect::DialectKind;
use crate::error::{CompileError, Result};
use crate::graph::SemanticGraph;
use crate::request::Request;

/// Parse a restricted single-table `SELECT`, synthesise a [`Request`], and
/// return it so the caller can run it through [`crate::planner::plan`] (or
/// inspect it before compiling).
pub fn rewrite(sql: &str, graph: &SemanticGraph, dialect: DialectKind) -> Result<Request> {
    let d = GenericDialect {};
    let mut statements = Parser::parse_sql(&d, sql).map_err(|e| CompileError::ParseError {
        fragment: sql.to_string(),
        reason: e.to_string(),
    })?;

    if statements.len() != 1 {
        return Err(CompileError::UnsupportedUserSQL(
            "exactly one SELECT statement is required".to_string(),
        ));
    }

    let Statement::Query(query) = statements.remove(0) else {
        return Err(CompileError::UnsupportedUserSQL(
            "only SELECT queries are supported".to_string(),
        ));
    };

    let SetExpr::Select(select) = *query.body else {
        return Err(CompileError::UnsupportedUserSQL(
            "set operations (UNION/INTERSECT/EXCEPT) are not supported".to_string(),
        ));
    };

    let model_name = single_model_from(&select.from)?;
    graph.get_model(&model_name)?;

    let mut request = Request::new(dialect);

    for item in &select.projection {
        let reference = match item {
            SelectItem::UnnamedExpr(expr) => qualified_reference(expr, &model_name)?,
            SelectItem::ExprWithAlias { expr, .. } => qualified_reference(expr, &model_name)?,
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                return Err(CompileError::UnsupportedUserSQL(
                    "`SELECT *` is not supported; name each metric/dimension".to_string(),
                ))
            }
        };
        request = classify_and_add(request, graph, &model_name, reference);
    }

    if let Some(expr) = &select.selection {
        request = request.with_filter(qualify_bare_idents(expr, &model_name));
    }

    for ob in &query.order_by {
        request = add_order_by(request, ob, &model_name);
    }

    if let Some(limit_expr) = &query.limit {
        if let Expr::Value(v) = limit_expr {
            if let Ok(n) = v.to_string().parse::<u64>() {
                request = request.with_limit(n);
            }
        }
    }

    Ok(request)
}

fn single_model_from(from: &[TableWithJoins]) -> Result<String> {
    if from.len() != 1 || !from[0].joins.is_empty() {
        return Err(CompileError::UnsupportedUserSQL(
            "joins are not supported; the planner derives join paths from the semantic graph"
                .to_string(),
        ));
    }
    match &from[0].relation {
        TableFactor::Table { name, .. } => Ok(name
            .0
            .first()
            .map(|i| i.value.clone())
            .unwrap_or_default()),
        _ => Err(CompileError::UnsupportedUserSQL(
            "only a single bare table reference is supported in FROM".to_string(),
        )),
    }
}

/// Resolve a projection expression to a `model.field` reference, qualifying
/// a bare identifier with `default_model`.
fn qualified_reference(expr: &Expr, default_model: &str) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(format!("{default_model}.{}", ident.value)),
        Expr::CompoundIdentifier(parts) => Ok(parts
            .iter()
            .map(|p| p.value.as_str())
            .collect::<Vec<_>>()
            .join(".")),
        _ => Err(CompileError::UnsupportedUserSQL(format!(
            "unsupported projection expression `{expr}`; only bare or qualified column references are allowed"
        ))),
    }
}

/// Add `reference` to the request as a metric or dimension, deciding which
/// by checking whether the named model declares a metric with that name.
fn classify_and_add(request: Request, graph: &SemanticGraph, model_name: &str, reference: String) -> Request {
    if let Ok(model) = graph.get_model(model_name) {
        let (_, field) = reference.split_once('.').unwrap_or(("", reference.as_str()));
        let bare = field.split("__").next().unwrap_or(field);
        if model.get_metric(bare).is_some() {
            return request.with_metric(reference);
        }
    }
    request.with_dimension(reference)
}

/// Qualify bare identifiers in a WHERE expression with `default_model`, then
/// render it back to SQL text for the request's filter list.
fn qualify_bare_idents(expr: &Expr, default_model: &str) -> String {
    let qualified = crate::sql_ast::rewrite_identifiers(expr, &mut |name| {
        if name.contains('.') {
            None
        } else {
            Some(format!("{default_model}.{name}"))
        }
    });
    qualified.to_string()
}

fn add_order_by(request: Request, ob: &OrderByExpr, default_model: &str) -> Request {
    let expr_sql = qualify_bare_idents(&ob.expr, default_model);
    let descending = ob.asc == Some(false);
    request.with_order_by(expr_sql, descending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::model::{Dimension, Metric, Model};

    fn orders_graph() -> SemanticGraph {
        let orders = Model::new("orders")
            .with_table("public.orders")
            .with_dimension(Dimension::categorical("status"))
            .with_metric(Metric::sum("revenue", "order_amount"));
        GraphBuilder::new().add_model(orders).build().unwrap()
    }

    #[test]
    fn rewrites_simple_select_into_request() {
        let g = orders_graph();
        let req = rewrite(
            "SELECT status, revenue FROM orders WHERE status = 'completed' LIMIT 10",
            &g,
            DialectKind::DuckDb,
        )
        .unwrap();
        assert_eq!(req.dimensions.len(), 1);
        assert_eq!(req.metrics.len(), 1);
        assert_eq!(req.limit, Some(10));
        assert_eq!(req.filters.len(), 1);
        assert!(req.filters[0].contains("orders.status"));
    }

    #[test]
    fn rejects_join() {
        let g = orders_graph();
        let err = rewrite(
            "SELECT status FROM orders JOIN customers ON orders.customer_id = customers.id",
            &g,
            DialectKind::DuckDb,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedUserSQL(_)));
    }

    #[test]
    fn rejects_star_projection() {
        let g = orders_graph();
        let err = rewrite("SELECT * FROM orders", &g, DialectKind::DuckDb).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedUserSQL(_)));
    }
}
