//! Configuration for the compiler. TOML-based, mirroring the global-defaults
//! layering style a semantic layer typically uses, trimmed to what a pure
//! `(graph, request, dialect) -> sql` function still cares about: row-limit
//! defaults and validation strictness. There is no pool, schema cache, or
//! per-datasource section here — there is no datasource to configure.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root compiler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub query: QueryConfig,
    pub validation: ValidationConfig,
    /// Dialect used when a request does not specify one.
    pub default_dialect: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            query: QueryConfig::default(),
            validation: ValidationConfig::default(),
            default_dialect: "duckdb".to_string(),
        }
    }
}

/// Row-limit defaults applied by [`crate::compile::compile`] when a request
/// omits `limit` or exceeds the configured maximum.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Maximum rows a request may ask for (0 = unlimited).
    pub max_row_limit: u64,
    /// Row limit applied when the request specifies none.
    pub default_row_limit: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            max_row_limit: 0,
            default_row_limit: 1000,
        }
    }
}

/// Structural-validation strictness.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// When true, `Validator` reports problems without erroring.
    pub warn_only: bool,
}

impl CompilerConfig {
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CompilerConfig::default();
        assert_eq!(cfg.query.default_row_limit, 1000);
        assert_eq!(cfg.query.max_row_limit, 0);
        assert!(!cfg.validation.warn_only);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = CompilerConfig::from_toml_str("default_dialect = \"postgres\"\n").unwrap();
        assert_eq!(cfg.default_dialect, "postgres");
        assert_eq!(cfg.query.default_row_limit, 1000);
    }
}
