//! Error types for blockstore-upgrade

use crate::types::ResourceKind;
use thiserror::Error;

/// Result type alias for upgrade operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating resources
#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("{context}: {source}")]
    Step {
        context: String,
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap this error with a prefix naming the step that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Step {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the innermost cause is a missing resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
