//! Query builder error types.

use thiserror::Error;

/// Errors raised while configuring, compiling or executing a query.
///
/// Grammar, value and build errors are configuration bugs in the where-spec
/// and surface synchronously during compilation. Backend errors come from the
/// executor and are passed through untouched.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid where key '{key}': {reason}")]
    Grammar { key: String, reason: String },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("where spec produced no constraints: {reason}")]
    Build { reason: String },

    #[error("page reference '{0}' could not be resolved")]
    UnresolvedPage(String),

    #[error("no executor configured for this query")]
    MissingExecutor,

    #[error(transparent)]
    Backend(anyhow::Error),
}

impl QueryError {
    pub(crate) fn grammar(key: &str, reason: impl Into<String>) -> Self {
        QueryError::Grammar {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(key: &str, reason: impl Into<String>) -> Self {
        QueryError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using QueryError.
pub type QueryResult<T> = Result<T, QueryError>;
