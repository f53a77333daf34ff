use thiserror::Error;

/// Every error the compiler can produce. Each variant carries the offending
/// name(s) verbatim so callers can surface them without re-deriving context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("unknown dimension '{0}'")]
    UnknownDimension(String),

    #[error("unknown segment '{0}'")]
    UnknownSegment(String),

    #[error("ambiguous reference '{name}': resolves to models {candidates:?}")]
    AmbiguousReference {
        name: String,
        candidates: Vec<String>,
    },

    #[error("invalid granularity '{requested}' for dimension '{dimension}'")]
    InvalidGranularity {
        dimension: String,
        requested: String,
    },

    #[error("no join path from '{from}' to '{to}'")]
    NoJoinPath { from: String, to: String },

    #[error("metric '{0}' is self-referential")]
    SelfReferentialMetric(String),

    #[error("invalid metric kind for '{name}': {reason}")]
    InvalidMetricKind { name: String, reason: String },

    #[error("unsupported user SQL: {0}")]
    UnsupportedUserSQL(String),

    #[error("failed to parse SQL fragment '{fragment}': {reason}")]
    ParseError { fragment: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;

impl From<sqlparser::parser::ParserError> for CompileError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        CompileError::ParseError {
            fragment: String::new(),
            reason: e.to_string(),
        }
    }
}

/// Raised when loading a [`crate::config::CompilerConfig`] from TOML text.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}
