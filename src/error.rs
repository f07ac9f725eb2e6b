//! Error taxonomy surfaced by the core to its callers.
use crate::gateway::GatewayError;
use thiserror::Error;

/// Errors returned by mutations and explicit intents.
///
/// Reads through the query cache never produce this type; their failures are
/// carried as state on [`crate::cache::QueryState`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Input rejected before any gateway call.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The targeted row does not exist in the store.
    #[error("not found: {0}")]
    NotFound(String),
    /// Network or store failure.
    #[error("store error: {0}")]
    Remote(String),
    /// A domain rule forbids the operation.
    #[error("{0}")]
    Constraint(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        CoreError::Constraint(msg.into())
    }

    /// True for errors raised locally, before the store was touched.
    pub fn is_local(&self) -> bool {
        matches!(self, CoreError::Validation(_) | CoreError::Constraint(_))
    }
}

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { table, id } => {
                CoreError::NotFound(format!("{} {}", table.name(), id))
            }
            other => CoreError::Remote(other.to_string()),
        }
    }
}
