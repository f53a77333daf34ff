//! The semantic graph: an index over models, graph-level metrics, and join
//! path discovery between them.
//!
//! Construction goes through [`GraphBuilder`] rather than a process-wide
//! ambient registry — callers build models and hand them to the builder
//! explicitly; there is no global "current graph" state.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{CompileError, Result};
use crate::model::{Metric, Model, RelationshipType, TimeGranularity};

/// One hop in a join path: `from_model.from_column = to_model.to_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub from_model: String,
    pub from_column: String,
    pub to_model: String,
    pub to_column: String,
    /// Name of the relationship that produced this edge, if not synthetic
    /// (many-to-many hops through a junction have no single owning name).
    pub via: Option<String>,
}

/// Mapping model-name -> [`Model`], plus graph-level metrics that may be
/// referenced unqualified from any model.
#[derive(Debug, Clone, Default)]
pub struct SemanticGraph {
    models: BTreeMap<String, Model>,
    /// Model names in `add_model` declaration order, since `models` (a
    /// `BTreeMap`, for O(log n) lookup by name) sorts alphabetically and
    /// can't answer "which model was declared first".
    model_order: Vec<String>,
    metrics: BTreeMap<String, Metric>,
}

impl SemanticGraph {
    pub fn get_model(&self, name: &str) -> Result<&Model> {
        self.models
            .get(name)
            .ok_or_else(|| CompileError::UnknownModel(name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.model_order.iter().filter_map(move |name| self.models.get(name))
    }

    pub fn graph_metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Split `"model.field"` into `(model, field)`. Returns `None` for an
    /// unqualified name or a malformed qualifier.
    pub fn parse_qualified(name: &str) -> Option<(&str, &str)> {
        let (a, b) = name.split_once('.')?;
        if a.is_empty() || b.is_empty() {
            return None;
        }
        Some((a, b))
    }

    /// Resolve a metric reference, qualified or not. Returns the owning
    /// model name (`None` for a graph-level metric) and the metric.
    pub fn resolve_metric(&self, reference: &str) -> Result<(Option<&str>, &Metric)> {
        if let Some((model_name, metric_name)) = Self::parse_qualified(reference) {
            let model = self.get_model(model_name)?;
            let metric = model
                .get_metric(metric_name)
                .ok_or_else(|| CompileError::UnknownMetric(reference.to_string()))?;
            return Ok((Some(model_name), metric));
        }

        if let Some(metric) = self.metrics.get(reference) {
            return Ok((None, metric));
        }

        let mut matches: Vec<(&str, &Metric)> = Vec::new();
        for model in self.models() {
            if let Some(metric) = model.get_metric(reference) {
                matches.push((model.name.as_str(), metric));
            }
        }
        match matches.len() {
            0 => Err(CompileError::UnknownMetric(reference.to_string())),
            1 => Ok((Some(matches[0].0), matches[0].1)),
            _ => Err(CompileError::AmbiguousReference {
                name: reference.to_string(),
                candidates: matches.iter().map(|(m, _)| m.to_string()).collect(),
            }),
        }
    }

    /// Resolve a dimension reference of the form `model.dim` or
    /// `model.dim__granularity`. Returns the owning model name, the
    /// dimension name (without suffix) and the requested granularity, if
    /// any.
    pub fn resolve_dimension_ref<'a>(
        &'a self,
        reference: &'a str,
    ) -> Result<(&'a str, &'a str, Option<TimeGranularity>)> {
        let (model_name, field) = Self::parse_qualified(reference)
            .ok_or_else(|| CompileError::UnknownDimension(reference.to_string()))?;
        let model = self.get_model(model_name)?;

        if let Some((dim_name, grain_str)) = field.split_once("__") {
            let dim = model
                .get_dimension(dim_name)
                .ok_or_else(|| CompileError::UnknownDimension(reference.to_string()))?;
            let grain = TimeGranularity::parse(grain_str).ok_or_else(|| {
                CompileError::InvalidGranularity {
                    dimension: reference.to_string(),
                    requested: grain_str.to_string(),
                }
            })?;
            if !dim.accepts_granularity(grain) {
                return Err(CompileError::InvalidGranularity {
                    dimension: reference.to_string(),
                    requested: grain_str.to_string(),
                });
            }
            return Ok((model_name, dim_name, Some(grain)));
        }

        let dim = model
            .get_dimension(field)
            .ok_or_else(|| CompileError::UnknownDimension(reference.to_string()))?;
        Ok((model_name, field, dim.granularity))
    }

    /// BFS over the undirected projection of relationship edges. A
    /// many-to-many relationship expands into two synthetic hops through its
    /// junction model. Ties are broken by shortest path, then by the order
    /// models/relationships were declared. Self-loops are never followed.
    pub fn find_relationship_path(&self, from: &str, to: &str) -> Result<Vec<JoinEdge>> {
        self.get_model(from)?;
        self.get_model(to)?;

        if from == to {
            return Ok(Vec::new());
        }

        let adjacency = self.build_adjacency();

        let mut visited: BTreeMap<String, (String, JoinEdge)> = BTreeMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(from.to_string(), (String::new(), dummy_edge()));
        queue.push_back(from.to_string());

        let mut found = false;
        while let Some(current) = queue.pop_front() {
            if current == to {
                found = true;
                break;
            }
            let Some(edges) = adjacency.get(&current) else {
                continue;
            };
            for edge in edges {
                if edge.to_model == current {
                    continue; // self-loop guard
                }
                if visited.contains_key(&edge.to_model) {
                    continue;
                }
                visited.insert(edge.to_model.clone(), (current.clone(), edge.clone()));
                queue.push_back(edge.to_model.clone());
            }
        }

        if !found && !visited.contains_key(to) {
            return Err(CompileError::NoJoinPath {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        // Walk parent pointers back from `to` to `from`.
        let mut path = Vec::new();
        let mut cursor = to.to_string();
        while cursor != from {
            let (parent, edge) = visited
                .get(&cursor)
                .cloned()
                .ok_or_else(|| CompileError::NoJoinPath {
                    from: from.to_string(),
                    to: to.to_string(),
                })?;
            path.push(edge);
            cursor = parent;
        }
        path.reverse();
        Ok(path)
    }

    fn build_adjacency(&self) -> BTreeMap<String, Vec<JoinEdge>> {
        let mut adjacency: BTreeMap<String, Vec<JoinEdge>> = BTreeMap::new();
        let mut push = |a: &str, edge: JoinEdge| {
            adjacency.entry(a.to_string()).or_default().push(edge);
        };

        for model in self.models() {
            for rel in &model.relationships {
                if rel.name == model.name {
                    continue; // self-referential relationship, never followed
                }
                let Ok(target) = self.get_model(&rel.name) else {
                    continue;
                };

                match rel.r#type {
                    RelationshipType::ManyToOne | RelationshipType::OneToOne => {
                        let fk = rel.foreign_key.clone().unwrap_or_else(|| rel.fk());
                        let pk = rel
                            .primary_key
                            .clone()
                            .unwrap_or_else(|| target.primary_key_expr());
                        push(
                            &model.name,
                            JoinEdge {
                                from_model: model.name.clone(),
                                from_column: fk.clone(),
                                to_model: target.name.clone(),
                                to_column: pk.clone(),
                                via: Some(rel.name.clone()),
                            },
                        );
                        push(
                            &target.name,
                            JoinEdge {
                                from_model: target.name.clone(),
                                from_column: pk,
                                to_model: model.name.clone(),
                                to_column: fk,
                                via: Some(rel.name.clone()),
                            },
                        );
                    }
                    RelationshipType::OneToMany => {
                        // The foreign key lives on the target model.
                        let fk = rel.foreign_key.clone().unwrap_or_else(|| rel.fk());
                        let pk = rel
                            .primary_key
                            .clone()
                            .unwrap_or_else(|| model.primary_key_expr());
                        push(
                            &model.name,
                            JoinEdge {
                                from_model: model.name.clone(),
                                from_column: pk.clone(),
                                to_model: target.name.clone(),
                                to_column: fk.clone(),
                                via: Some(rel.name.clone()),
                            },
                        );
                        push(
                            &target.name,
                            JoinEdge {
                                from_model: target.name.clone(),
                                from_column: fk,
                                to_model: model.name.clone(),
                                to_column: pk,
                                via: Some(rel.name.clone()),
                            },
                        );
                    }
                    RelationshipType::ManyToMany => {
                        let Some(junction_name) = rel.through.clone() else {
                            continue;
                        };
                        let Ok(junction) = self.get_model(&junction_name) else {
                            continue;
                        };
                        let through_fk = rel
                            .through_foreign_key
                            .clone()
                            .unwrap_or_else(|| format!("{}_id", model.name));
                        let related_fk = rel
                            .related_foreign_key
                            .clone()
                            .unwrap_or_else(|| format!("{}_id", target.name));
                        let model_pk = model.primary_key_expr();
                        let target_pk = target.primary_key_expr();

                        push(
                            &model.name,
                            JoinEdge {
                                from_model: model.name.clone(),
                                from_column: model_pk.clone(),
                                to_model: junction.name.clone(),
                                to_column: through_fk.clone(),
                                via: Some(rel.name.clone()),
                            },
                        );
                        push(
                            &junction.name,
                            JoinEdge {
                                from_model: junction.name.clone(),
                                from_column: through_fk,
                                to_model: model.name.clone(),
                                to_column: model_pk,
                                via: Some(rel.name.clone()),
                            },
                        );
                        push(
                            &junction.name,
                            JoinEdge {
                                from_model: junction.name.clone(),
                                from_column: related_fk.clone(),
                                to_model: target.name.clone(),
                                to_column: target_pk.clone(),
                                via: Some(rel.name.clone()),
                            },
                        );
                        push(
                            &target.name,
                            JoinEdge {
                                from_model: target.name.clone(),
                                from_column: target_pk,
                                to_model: junction.name.clone(),
                                to_column: related_fk,
                                via: Some(rel.name.clone()),
                            },
                        );
                    }
                }
            }
        }
        adjacency
    }
}

fn dummy_edge() -> JoinEdge {
    JoinEdge {
        from_model: String::new(),
        from_column: String::new(),
        to_model: String::new(),
        to_column: String::new(),
        via: None,
    }
}

/// Builds a [`SemanticGraph`] from explicitly constructed models. No
/// directory loading, no ambient "current graph" — the caller owns
/// construction.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    models: BTreeMap<String, Model>,
    model_order: Vec<String>,
    metrics: BTreeMap<String, Metric>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(mut self, model: Model) -> Self {
        if !self.models.contains_key(&model.name) {
            self.model_order.push(model.name.clone());
        }
        self.models.insert(model.name.clone(), model);
        self
    }

    pub fn add_metric(mut self, metric: Metric) -> Self {
        self.metrics.insert(metric.name.clone(), metric);
        self
    }

    /// Validate relationship targets and finalise the graph.
    pub fn build(self) -> Result<SemanticGraph> {
        for model in self.model_order.iter().filter_map(|name| self.models.get(name)) {
            for rel in &model.relationships {
                if !self.models.contains_key(&rel.name) {
                    return Err(CompileError::UnknownModel(rel.name.clone()));
                }
                if rel.r#type == RelationshipType::ManyToMany {
                    match &rel.through {
                        Some(j) if self.models.contains_key(j) => {}
                        Some(j) => return Err(CompileError::UnknownModel(j.clone())),
                        None => {
                            return Err(CompileError::InvalidMetricKind {
                                name: rel.name.clone(),
                                reason: "many_to_many relationship missing `through` junction"
                                    .to_string(),
                            })
                        }
                    }
                }
            }
        }
        Ok(SemanticGraph {
            models: self.models,
            model_order: self.model_order,
            metrics: self.metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dimension, Metric as M, Relationship};

    fn orders_customers_regions() -> SemanticGraph {
        let regions = Model::new("regions")
            .with_table("public.regions")
            .with_primary_key(vec!["region_id".into()])
            .with_dimension(Dimension::categorical("region_name"));

        let customers = Model::new("customers")
            .with_table("public.customers")
            .with_primary_key(vec!["customer_id".into()])
            .with_dimension(Dimension::categorical("region"))
            .with_relationship(
                Relationship::many_to_one("regions").with_keys("region_id", "region_id"),
            );

        let orders = Model::new("orders")
            .with_table("public.orders")
            .with_primary_key(vec!["order_id".into()])
            .with_dimension(Dimension::categorical("status"))
            .with_metric(M::sum("revenue", "order_amount"))
            .with_relationship(
                Relationship::many_to_one("customers").with_keys("customer_id", "customer_id"),
            );

        GraphBuilder::new()
            .add_model(orders)
            .add_model(customers)
            .add_model(regions)
            .build()
            .unwrap()
    }

    #[test]
    fn direct_path_between_two_models() {
        let g = orders_customers_regions();
        let path = g.find_relationship_path("orders", "customers").unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].to_model, "customers");
    }

    #[test]
    fn multi_hop_path_has_two_edges() {
        let g = orders_customers_regions();
        let path = g.find_relationship_path("orders", "regions").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].to_model, "customers");
        assert_eq!(path[1].to_model, "regions");
    }

    #[test]
    fn missing_path_is_an_error() {
        let lonely = Model::new("standalone");
        let g = GraphBuilder::new().add_model(lonely).build().unwrap();
        let err = g.find_relationship_path("standalone", "nowhere");
        assert!(err.is_err());
    }

    #[test]
    fn bfs_tie_break_follows_declaration_order_not_alphabetical() {
        // "start" has no relationships of its own; both "branch_a" and
        // "branch_b" declare a many_to_one back to "start" (contributing a
        // reverse edge into start's adjacency list) and a many_to_one to
        // "dest". branch_b is declared before branch_a, so the path from
        // start to dest must go through branch_b — alphabetically branch_a
        // would win if model declaration order weren't tracked.
        let start = Model::new("start").with_primary_key(vec!["id".into()]);
        let dest = Model::new("dest").with_primary_key(vec!["id".into()]);
        let branch_b = Model::new("branch_b")
            .with_primary_key(vec!["id".into()])
            .with_relationship(Relationship::many_to_one("start").with_keys("start_id", "id"))
            .with_relationship(Relationship::many_to_one("dest").with_keys("dest_id", "id"));
        let branch_a = Model::new("branch_a")
            .with_primary_key(vec!["id".into()])
            .with_relationship(Relationship::many_to_one("start").with_keys("start_id", "id"))
            .with_relationship(Relationship::many_to_one("dest").with_keys("dest_id", "id"));

        let g = GraphBuilder::new()
            .add_model(start)
            .add_model(dest)
            .add_model(branch_b)
            .add_model(branch_a)
            .build()
            .unwrap();

        let path = g.find_relationship_path("start", "dest").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].to_model, "branch_b");
        assert_eq!(path[1].to_model, "dest");
    }

    #[test]
    fn ambiguous_unqualified_metric_reference() {
        let a = Model::new("a").with_metric(M::sum("revenue", "x"));
        let b = Model::new("b").with_metric(M::sum("revenue", "y"));
        let g = GraphBuilder::new().add_model(a).add_model(b).build().unwrap();
        let err = g.resolve_metric("revenue").unwrap_err();
        assert!(matches!(err, CompileError::AmbiguousReference { .. }));
    }

    #[test]
    fn qualified_dimension_with_granularity_suffix() {
        let m = Model::new("events").with_dimension(
            Dimension::time("event_date", TimeGranularity::Day)
                .with_supported_granularities(vec![TimeGranularity::Month]),
        );
        let g = GraphBuilder::new().add_model(m).build().unwrap();
        let (model, dim, grain) = g.resolve_dimension_ref("events.event_date__month").unwrap();
        assert_eq!(model, "events");
        assert_eq!(dim, "event_date");
        assert_eq!(grain, Some(TimeGranularity::Month));
    }
}
