//! Error taxonomy.
//!
//! Properties of the *request* (unsupported method/artifact combinations,
//! missing collaborators, illegal state transitions) are raised as
//! [`ConcordError`]. Properties of the *data* (bad JSON, model garbage,
//! provider outages) never raise; they are folded into result records.

pub mod provider;

pub use provider::{ProviderError, ProviderErrorKind};

use crate::model::{ActionKind, ArtifactType, EvaluationMethod, MismatchStatus};

#[derive(Debug, thiserror::Error)]
pub enum ConcordError {
    /// The method cannot judge this artifact type at all.
    #[error("method '{method}' does not support artifact type '{artifact_type}'")]
    UnsupportedMethod {
        method: EvaluationMethod,
        artifact_type: ArtifactType,
    },

    /// The method needs a collaborator that was never wired in.
    #[error("method '{method}' is not configured: {reason}")]
    MethodNotConfigured {
        method: EvaluationMethod,
        reason: String,
    },

    #[error("no transform registered for action '{action}' on artifact type '{artifact_type}'")]
    UnsupportedTransform {
        action: ActionKind,
        artifact_type: ArtifactType,
    },

    #[error("transform '{transform_id}' is not idempotent on this content")]
    IdempotencyViolation { transform_id: String },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: MismatchStatus,
        to: MismatchStatus,
    },

    #[error("user '{user}' has already approved this plan")]
    DuplicateApproval { user: String },

    #[error("invalid record: {message}")]
    InvalidRecord { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("store error: {message}")]
    Store { message: String },
}

impl ConcordError {
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// True for errors caused by how the caller wired or invoked the engine.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMethod { .. }
                | Self::MethodNotConfigured { .. }
                | Self::UnsupportedTransform { .. }
                | Self::Config { .. }
        )
    }
}

impl From<std::io::Error> for ConcordError {
    fn from(err: std::io::Error) -> Self {
        Self::Cache {
            message: err.to_string(),
        }
    }
}

/// Result type for engine operations.
pub type ConcordResult<T> = Result<T, ConcordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misconfiguration_covers_request_errors_only() {
        let err = ConcordError::UnsupportedMethod {
            method: EvaluationMethod::CanonicalJson,
            artifact_type: ArtifactType::Binary,
        };
        assert!(err.is_misconfiguration());
        assert_eq!(
            err.to_string(),
            "method 'canonical_json' does not support artifact type 'binary'"
        );

        let err = ConcordError::DuplicateApproval {
            user: "alice".into(),
        };
        assert!(!err.is_misconfiguration());
    }

    #[test]
    fn invalid_transition_renders_snake_case_tags() {
        let err = ConcordError::InvalidTransition {
            from: MismatchStatus::Resolved,
            to: MismatchStatus::Analyzing,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition: resolved -> analyzing"
        );
    }
}
