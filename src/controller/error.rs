//! # Errors
//!
//! Error taxonomy of the add-on engine. Every component returns `AddOnError`;
//! the reconciler aggregates them per cluster and decides between surfacing
//! them in status and requeueing with backoff.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddOnError {
    /// Malformed cluster selector. Not retried until the spec changes.
    #[error("invalid cluster selector: {0}")]
    SelectorInvalid(String),

    #[error("referenced {reference} not found")]
    ReferenceNotFound { reference: String },

    #[error("referenced {reference} is invalid: {reason}")]
    ReferenceInvalid { reference: String, reason: String },

    #[error("fetch failed: {0}")]
    FetchTransport(String),

    /// Some resources were applied, others rejected by the target cluster
    #[error("{} resource(s) failed to deploy: {}", .failures.len(), .failures.join("; "))]
    DeployPartialFailure { failures: Vec<String> },

    /// Target cluster unreachable or unusable
    #[error("deployment failed: {0}")]
    DeployFatal(String),

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("status update conflict: {0}")]
    StatusConflict(String),
}

impl AddOnError {
    /// Terminal errors are surfaced in status and only retried after a spec change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, AddOnError::SelectorInvalid(_))
    }

    /// Status condition reason
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AddOnError::SelectorInvalid(_) => "SelectorInvalid",
            AddOnError::ReferenceNotFound { .. } => "ReferenceNotFound",
            AddOnError::ReferenceInvalid { .. } => "ReferenceInvalid",
            AddOnError::FetchTransport(_) => "FetchTransportError",
            AddOnError::DeployPartialFailure { .. } => "DeployPartialFailure",
            AddOnError::DeployFatal(_) => "DeployFatal",
            AddOnError::Cancelled => "Cancelled",
            AddOnError::Kube(_) => "KubernetesError",
            AddOnError::Serialization(_) => "SerializationError",
            AddOnError::StatusConflict(_) => "StatusConflict",
        }
    }

    pub(crate) fn reference_invalid(reference: impl ToString, reason: impl ToString) -> Self {
        AddOnError::ReferenceInvalid {
            reference: reference.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn reference_not_found(reference: impl ToString) -> Self {
        AddOnError::ReferenceNotFound {
            reference: reference.to_string(),
        }
    }
}

/// `true` when the API server answered 404
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// `true` when the API server answered 409
pub(crate) fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_selector_errors_are_terminal() {
        assert!(AddOnError::SelectorInvalid("x".into()).is_terminal());
        assert!(!AddOnError::reference_not_found("ConfigMap:default/cm1").is_terminal());
        assert!(!AddOnError::FetchTransport("timeout".into()).is_terminal());
        assert!(!AddOnError::DeployFatal("unreachable".into()).is_terminal());
    }

    #[test]
    fn test_partial_failure_message_lists_failures() {
        let err = AddOnError::DeployPartialFailure {
            failures: vec!["v1/ConfigMap default/a: denied".into(), "apps/v1/Deployment default/b: invalid".into()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 resource(s) failed to deploy"));
        assert!(msg.contains("default/a: denied"));
        assert_eq!(err.reason(), "DeployPartialFailure");
    }
}
