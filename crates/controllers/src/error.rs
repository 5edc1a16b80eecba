//! Controller error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    #[error("conflict updating {kind} {key}")]
    Conflict { kind: String, key: String },

    #[error("{0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(String),
}

impl ControllerError {
    pub fn not_found(kind: &str, key: &str) -> Self {
        ControllerError::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound { .. })
    }
}
