//! Declarative semantic model types: dimensions, metrics, relationships,
//! segments, pre-aggregations and the model that owns them.
//!
//! Metrics are represented as a tagged enum over their kind rather than a
//! single record carrying every possible field — cosmetic fields common to
//! every kind live on the outer [`Metric`] struct, the [`MetricKind`] variant
//! carries only what that kind needs. Validation of "which fields go
//! together" then reduces to pattern matching instead of ad hoc checks.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A time-truncation unit, ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "second" => Some(Self::Second),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "quarter" => Some(Self::Quarter),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }

    /// True if `self` is the same grain or coarser than `base`, and the pair
    /// is not the week/month-quarter-year special case (weeks do not align
    /// with calendar month/quarter/year boundaries).
    pub fn compatible_with(&self, base: TimeGranularity) -> bool {
        if *self < base {
            return false;
        }
        if base == TimeGranularity::Week
            && matches!(
                self,
                TimeGranularity::Month | TimeGranularity::Quarter | TimeGranularity::Year
            )
        {
            return false;
        }
        true
    }
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Categorical,
    Numeric,
    Boolean,
    Time,
}

/// The DB-type-family -> dimension-kind mapping a `Model` with
/// `auto_dimensions = true` uses, per spec.md §6.4. The core never
/// introspects a live schema itself (that's an external collaborator's
/// job); this is the pure lookup table an adapter calls per discovered
/// column, producing the [`Dimension`] the core then treats identically to
/// a declared one.
pub fn auto_dimension_kind(db_type: &str) -> (DimensionKind, Option<TimeGranularity>) {
    match db_type.to_ascii_uppercase().as_str() {
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "DECIMAL" | "NUMERIC" | "FLOAT"
        | "DOUBLE" | "REAL" => (DimensionKind::Numeric, None),
        "BOOL" | "BOOLEAN" => (DimensionKind::Boolean, None),
        "DATE" => (DimensionKind::Time, Some(TimeGranularity::Day)),
        "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => (DimensionKind::Time, Some(TimeGranularity::Second)),
        // CHAR/VARCHAR/TEXT/JSON/BLOB and any unrecognised type fall back to
        // categorical, per spec.md §6.4's explicit "unknown fallback".
        _ => (DimensionKind::Categorical, None),
    }
}

/// Build the [`Dimension`] a `Model` with `auto_dimensions = true` would
/// synthesise for one introspected column, or `None` if `column` is one of
/// the model's primary-key columns (always excluded from auto-introspection
/// per spec.md §6.4).
pub fn auto_dimension_for_column(model: &Model, column: &str, db_type: &str) -> Option<Dimension> {
    if model.primary_key.iter().any(|pk| pk == column) {
        return None;
    }
    let (kind, granularity) = auto_dimension_kind(db_type);
    Some(Dimension {
        name: column.to_string(),
        kind,
        sql: None,
        granularity,
        supported_granularities: Vec::new(),
        parent: None,
        label: None,
        description: None,
        format: None,
        value_format_name: None,
    })
}

/// A named column-level attribute used to group or filter rows.
#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
    /// SQL snippet over the model's base row. Defaults to `name` if absent.
    pub sql: Option<String>,
    /// Base granularity, required when `kind == Time`.
    pub granularity: Option<TimeGranularity>,
    /// Granularities a query may additionally request beyond the base one.
    pub supported_granularities: Vec<TimeGranularity>,
    pub parent: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub value_format_name: Option<String>,
}

impl Dimension {
    pub fn new(name: impl Into<String>, kind: DimensionKind) -> Self {
        Dimension {
            name: name.into(),
            kind,
            sql: None,
            granularity: None,
            supported_granularities: Vec::new(),
            parent: None,
            label: None,
            description: None,
            format: None,
            value_format_name: None,
        }
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self::new(name, DimensionKind::Categorical)
    }

    pub fn time(name: impl Into<String>, granularity: TimeGranularity) -> Self {
        let mut d = Self::new(name, DimensionKind::Time);
        d.granularity = Some(granularity);
        d
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_supported_granularities(mut self, grains: Vec<TimeGranularity>) -> Self {
        self.supported_granularities = grains;
        self
    }

    /// The expression to project for this dimension, defaulting to its name.
    pub fn sql_expr(&self) -> &str {
        self.sql.as_deref().unwrap_or(&self.name)
    }

    /// Whether a finer-or-equal granularity suffix is acceptable for this
    /// dimension (its own base grain is always accepted).
    pub fn accepts_granularity(&self, requested: TimeGranularity) -> bool {
        let Some(base) = self.granularity else {
            return false;
        };
        if requested == base {
            return true;
        }
        self.supported_granularities.contains(&requested) && requested.compatible_with(base)
    }
}

/// Custom deserialize: a bare string means a categorical dimension whose
/// `sql` is that string; an object gives the full shape. Field `name` is
/// filled in by the caller from the enclosing map key when loading from a
/// declarative document.
impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Shorthand(String),
            Full(DimensionDoc),
        }

        #[derive(Deserialize)]
        struct DimensionDoc {
            #[serde(default)]
            name: Option<String>,
            #[serde(default = "default_kind")]
            r#type: DimensionKind,
            #[serde(default)]
            sql: Option<String>,
            #[serde(default)]
            granularity: Option<String>,
            #[serde(default)]
            supported_granularities: Vec<String>,
            #[serde(default)]
            parent: Option<String>,
            #[serde(default)]
            label: Option<String>,
            #[serde(default)]
            description: Option<String>,
            #[serde(default)]
            format: Option<String>,
            #[serde(default)]
            value_format_name: Option<String>,
        }

        fn default_kind() -> DimensionKind {
            DimensionKind::Categorical
        }

        match Repr::deserialize(deserializer)? {
            Repr::Shorthand(s) => Ok(Dimension::categorical(s.clone()).with_sql(s)),
            Repr::Full(doc) => Ok(Dimension {
                name: doc.name.unwrap_or_default(),
                kind: doc.r#type,
                sql: doc.sql,
                granularity: doc.granularity.as_deref().and_then(TimeGranularity::parse),
                supported_granularities: doc
                    .supported_granularities
                    .iter()
                    .filter_map(|g| TimeGranularity::parse(g))
                    .collect(),
                parent: doc.parent,
                label: doc.label,
                description: doc.description,
                format: doc.format,
                value_format_name: doc.value_format_name,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    CountDistinct,
    Min,
    Max,
    Median,
    Stddev,
    StddevPop,
    StddevSamp,
    Variance,
    VarPop,
    ApproxDistinct,
    ApproxQuantile,
    Mode,
}

impl Aggregation {
    /// Whether this aggregation can be re-aggregated across rollup rows
    /// directly (SUM of sums, MIN of mins, ...), used by the pre-aggregation
    /// matcher.
    pub fn directly_derivable(&self) -> bool {
        matches!(self, Self::Sum | Self::Min | Self::Max | Self::Count)
    }
}

/// The kind-specific payload of a [`Metric`]. See spec §3 "Metric" for the
/// field-presence rules each variant encodes structurally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    /// `agg(sql)`. `sql` absent + `agg == Count` means row count.
    /// `agg == CountDistinct` with no `sql` counts the owning model's
    /// primary key (concatenated if composite).
    Aggregate { agg: Aggregation, sql: Option<String> },
    /// `numerator / denominator`, each a (possibly qualified) metric name.
    Ratio {
        numerator: String,
        denominator: String,
    },
    /// `sql` is a formula over other metrics' output names.
    Derived { sql: String },
    /// Window metric over a base metric referenced by `sql`.
    Cumulative {
        sql: String,
        window: Option<String>,
        grain_to_date: Option<TimeGranularity>,
    },
    /// `comparison_type` one of yoy/mom/wow/...
    TimeComparison {
        base_metric: String,
        comparison_type: String,
    },
    /// Funnel-style conversion metric.
    Conversion {
        entity: String,
        base_event: String,
        conversion_event: String,
        conversion_window: String,
    },
}

/// Any computable numeric output exposed by the semantic layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(flatten)]
    pub kind: MetricKind,
    /// Templated row-level filter fragments (supports a `{model}`
    /// placeholder), always rendered as `CASE WHEN ... THEN ... END` inside
    /// the aggregate, never in WHERE/HAVING.
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub value_format_name: Option<String>,
    #[serde(default)]
    pub drill_fields: Vec<String>,
    #[serde(default)]
    pub default_time_dimension: Option<String>,
    #[serde(default)]
    pub default_grain: Option<TimeGranularity>,
    #[serde(default)]
    pub non_additive_dimension: Option<String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Metric {
            name: name.into(),
            kind,
            filters: Vec::new(),
            label: None,
            description: None,
            format: None,
            value_format_name: None,
            drill_fields: Vec::new(),
            default_time_dimension: None,
            default_grain: None,
            non_additive_dimension: None,
        }
    }

    pub fn sum(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(
            name,
            MetricKind::Aggregate {
                agg: Aggregation::Sum,
                sql: Some(sql.into()),
            },
        )
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self::new(
            name,
            MetricKind::Aggregate {
                agg: Aggregation::Count,
                sql: None,
            },
        )
    }

    pub fn count_distinct(name: impl Into<String>, sql: Option<String>) -> Self {
        Self::new(
            name,
            MetricKind::Aggregate {
                agg: Aggregation::CountDistinct,
                sql,
            },
        )
    }

    pub fn ratio(
        name: impl Into<String>,
        numerator: impl Into<String>,
        denominator: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            MetricKind::Ratio {
                numerator: numerator.into(),
                denominator: denominator.into(),
            },
        )
    }

    pub fn derived(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(
            name,
            MetricKind::Derived { sql: sql.into() },
        )
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    ManyToOne,
    OneToMany,
    OneToOne,
    ManyToMany,
}

/// A directed edge from the owning model to `name` (the target model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Target model name.
    pub name: String,
    pub r#type: RelationshipType,
    pub foreign_key: Option<String>,
    pub primary_key: Option<String>,
    /// Junction model name, required when `type == ManyToMany`.
    pub through: Option<String>,
    pub through_foreign_key: Option<String>,
    pub related_foreign_key: Option<String>,
}

impl Relationship {
    pub fn many_to_one(name: impl Into<String>) -> Self {
        Relationship {
            name: name.into(),
            r#type: RelationshipType::ManyToOne,
            foreign_key: None,
            primary_key: None,
            through: None,
            through_foreign_key: None,
            related_foreign_key: None,
        }
    }

    pub fn one_to_many(name: impl Into<String>) -> Self {
        Relationship {
            r#type: RelationshipType::OneToMany,
            ..Self::many_to_one(name)
        }
    }

    pub fn many_to_many(
        name: impl Into<String>,
        through: impl Into<String>,
    ) -> Self {
        Relationship {
            r#type: RelationshipType::ManyToMany,
            through: Some(through.into()),
            ..Self::many_to_one(name)
        }
    }

    pub fn with_keys(mut self, foreign_key: impl Into<String>, primary_key: impl Into<String>) -> Self {
        self.foreign_key = Some(foreign_key.into());
        self.primary_key = Some(primary_key.into());
        self
    }

    pub fn fk(&self) -> String {
        self.foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name))
    }

    pub fn pk(&self) -> String {
        self.primary_key.clone().unwrap_or_else(|| "id".to_string())
    }
}

/// A named predicate scoped to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    /// Templated SQL (supports `{model}` placeholder).
    pub sql: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Segment {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Segment {
            name: name.into(),
            sql: sql.into(),
            description: None,
        }
    }
}

/// An externally materialised rollup table attached to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreAggregation {
    pub name: String,
    /// Subset of the owning model's metric names this rollup materialises.
    pub measures: Vec<String>,
    /// Categorical dimension names retained in the rollup.
    pub dimensions: Vec<String>,
    pub time_dimension: Option<String>,
    pub granularity: Option<TimeGranularity>,
    pub partition_granularity: Option<TimeGranularity>,
}

impl PreAggregation {
    pub fn new(name: impl Into<String>) -> Self {
        PreAggregation {
            name: name.into(),
            measures: Vec::new(),
            dimensions: Vec::new(),
            time_dimension: None,
            granularity: None,
            partition_granularity: None,
        }
    }

    pub fn with_measures(mut self, measures: Vec<String>) -> Self {
        self.measures = measures;
        self
    }

    pub fn with_dimensions(mut self, dimensions: Vec<String>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_time(mut self, time_dimension: impl Into<String>, granularity: TimeGranularity) -> Self {
        self.time_dimension = Some(time_dimension.into());
        self.granularity = Some(granularity);
        self
    }

    /// Rollup table name by convention: `<model>_preagg_<name>`.
    pub fn table_name(&self, model: &str) -> String {
        format!("{model}_preagg_{}", self.name)
    }

    /// Raw measure column name on the rollup table for `measure`.
    pub fn raw_column(measure: &str) -> String {
        format!("{measure}_raw")
    }

    /// Column name for the rollup's time dimension at its stored grain.
    pub fn time_column(&self) -> Option<String> {
        let td = self.time_dimension.as_ref()?;
        let g = self.granularity?;
        Some(format!("{td}_{}", g.as_str()))
    }
}

/// A logical table with declared dimensions, metrics, relationships and
/// segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub table: Option<String>,
    pub sql: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub pre_aggregations: Vec<PreAggregation>,
    #[serde(default)]
    pub default_time_dimension: Option<String>,
    #[serde(default)]
    pub default_grain: Option<TimeGranularity>,
    #[serde(default)]
    pub auto_dimensions: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_primary_key() -> Vec<String> {
    vec!["id".to_string()]
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            table: None,
            sql: None,
            primary_key: default_primary_key(),
            dimensions: Vec::new(),
            metrics: Vec::new(),
            relationships: Vec::new(),
            segments: Vec::new(),
            pre_aggregations: Vec::new(),
            default_time_dimension: None,
            default_grain: None,
            auto_dimensions: false,
            label: None,
            description: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_primary_key(mut self, pk: Vec<String>) -> Self {
        self.primary_key = pk;
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn with_pre_aggregation(mut self, pre_agg: PreAggregation) -> Self {
        self.pre_aggregations.push(pre_agg);
        self
    }

    /// Either `table` or the model's own name.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// The FROM-clause source: the table name, or `sql` wrapped in parens.
    pub fn table_source(&self) -> String {
        match &self.sql {
            Some(sql) => format!("({sql})"),
            None => self.table_name().to_string(),
        }
    }

    pub fn get_dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn get_metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn get_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn get_segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn get_pre_aggregation(&self, name: &str) -> Option<&PreAggregation> {
        self.pre_aggregations.iter().find(|p| p.name == name)
    }

    /// Concatenation expression used for `count_distinct` on a composite key.
    pub fn primary_key_expr(&self) -> String {
        if self.primary_key.len() == 1 {
            self.primary_key[0].clone()
        } else {
            format!("CONCAT({})", self.primary_key.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_sql_expr_defaults_to_name() {
        let d = Dimension::categorical("status");
        assert_eq!(d.sql_expr(), "status");
    }

    #[test]
    fn dimension_shorthand_deserializes_to_categorical() {
        let d: Dimension = serde_json::from_str("\"status\"").unwrap();
        assert_eq!(d.kind, DimensionKind::Categorical);
        assert_eq!(d.sql_expr(), "status");
    }

    #[test]
    fn granularity_chain_rejects_week_for_month() {
        assert!(!TimeGranularity::Month.compatible_with(TimeGranularity::Week));
        assert!(TimeGranularity::Month.compatible_with(TimeGranularity::Day));
        assert!(TimeGranularity::Day.compatible_with(TimeGranularity::Day));
        assert!(!TimeGranularity::Day.compatible_with(TimeGranularity::Month));
    }

    #[test]
    fn relationship_defaults_fk_and_pk() {
        let r = Relationship::many_to_one("customers");
        assert_eq!(r.fk(), "customers_id");
        assert_eq!(r.pk(), "id");
    }

    #[test]
    fn model_builder_round_trips() {
        let m = Model::new("orders")
            .with_table("public.orders")
            .with_dimension(Dimension::categorical("status"))
            .with_metric(Metric::sum("revenue", "order_amount"));
        assert_eq!(m.table_name(), "public.orders");
        assert!(m.get_dimension("status").is_some());
        assert!(m.get_metric("revenue").is_some());
    }

    #[test]
    fn composite_primary_key_concatenates() {
        let m = Model::new("events").with_primary_key(vec!["a".into(), "b".into()]);
        assert_eq!(m.primary_key_expr(), "CONCAT(a, b)");
    }

    #[test]
    fn auto_dimension_kind_maps_date_and_timestamp_to_different_grains() {
        assert_eq!(
            auto_dimension_kind("DATE"),
            (DimensionKind::Time, Some(TimeGranularity::Day))
        );
        assert_eq!(
            auto_dimension_kind("TIMESTAMPTZ"),
            (DimensionKind::Time, Some(TimeGranularity::Second))
        );
        assert_eq!(auto_dimension_kind("BIGINT"), (DimensionKind::Numeric, None));
        assert_eq!(auto_dimension_kind("BOOLEAN"), (DimensionKind::Boolean, None));
        assert_eq!(auto_dimension_kind("JSON"), (DimensionKind::Categorical, None));
        assert_eq!(auto_dimension_kind("SOME_UNKNOWN_TYPE"), (DimensionKind::Categorical, None));
    }

    #[test]
    fn auto_dimension_for_column_excludes_primary_key() {
        let m = Model::new("orders").with_primary_key(vec!["order_id".into()]);
        assert!(auto_dimension_for_column(&m, "order_id", "BIGINT").is_none());
        let dim = auto_dimension_for_column(&m, "created_at", "TIMESTAMP").unwrap();
        assert_eq!(dim.kind, DimensionKind::Time);
        assert_eq!(dim.granularity, Some(TimeGranularity::Second));
    }
}
