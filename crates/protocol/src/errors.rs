//! Shim errors module

use thiserror::Error;

use crate::response::ErrorEnvelope;

/// Failures surfaced at the dispatch boundary.
///
/// Each variant maps onto one HTTP status and is rendered as an
/// [`ErrorEnvelope`]. Output the reconstruction cannot classify is never an
/// error and therefore has no variant here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShimError {
    #[error("Function \"{name}\" not found")]
    NotFound { name: String },

    #[error("Method {verb} not allowed")]
    MethodNotAllowed { verb: String },

    #[error("{description}")]
    ExecutionFailure { description: String },
}

impl ShimError {
    /// Build an execution failure from anything displayable
    pub fn execution(description: impl std::fmt::Display) -> Self {
        ShimError::ExecutionFailure {
            description: description.to_string(),
        }
    }

    /// HTTP status code for this failure
    pub fn status_code(&self) -> u16 {
        match self {
            ShimError::NotFound { .. } => 404,
            ShimError::MethodNotAllowed { .. } => 405,
            ShimError::ExecutionFailure { .. } => 500,
        }
    }

    /// NotFound is stable across retries; execution failures may not be.
    pub fn is_transient(&self) -> bool {
        matches!(self, ShimError::ExecutionFailure { .. })
    }

    /// Render the JSON error envelope
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self.to_string(),
            status_code: self.status_code(),
        }
    }
}
