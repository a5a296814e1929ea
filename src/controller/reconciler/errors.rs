//! # Error Taxonomy
//!
//! Every failure of a reconciliation ends up as one [`ManagedEnvError`], which fixes the
//! reason and message published on the `ErrorOccurred` condition. Messages never carry the
//! underlying cause; that goes to the logs.

use crate::constants::{
    CLUSTER_UNREACHABLE_MESSAGE, CONDITION_ERROR_OCCURRED, INTERNAL_ERROR_MESSAGE,
    INVALID_CREDENTIALS_MESSAGE, TOKEN_TIMEOUT_MESSAGE,
};
use crate::controller::credentials::{CredentialError, RemoteClusterError};
use crate::controller::mapping::MappingError;
use crate::controller::registration::RegistrationError;
use crate::crd::{Condition, ConditionReason, ConditionStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagedEnvError {
    /// Spec or credential Secret missing, malformed or without a usable credential
    #[error("validation failed: {0}")]
    Validation(String),
    /// The credential is rejected or lacks rights on the target cluster
    #[error("permission denied: {0}")]
    Permission(String),
    /// A provisioned service account never received a token
    #[error("timed out: {0}")]
    Timeout(String),
    /// The target API server could not be reached
    #[error("target cluster unreachable: {0}")]
    Unreachable(String),
    /// The resource is being deleted; the attempt was abandoned
    #[error("reconciliation cancelled")]
    Cancelled,
    /// Controller-side store failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl ManagedEnvError {
    /// Short label used in logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ManagedEnvError::Validation(_) => "validation",
            ManagedEnvError::Permission(_) => "permission",
            ManagedEnvError::Timeout(_) => "timeout",
            ManagedEnvError::Unreachable(_) => "unreachable",
            ManagedEnvError::Cancelled => "cancelled",
            ManagedEnvError::Internal(_) => "internal",
        }
    }

    #[must_use]
    pub fn reason(&self) -> ConditionReason {
        match self {
            ManagedEnvError::Validation(_) | ManagedEnvError::Permission(_) => {
                ConditionReason::ErrorOccurred
            }
            ManagedEnvError::Timeout(_) => ConditionReason::TokenTimeout,
            ManagedEnvError::Unreachable(_) => ConditionReason::ClusterUnreachable,
            ManagedEnvError::Cancelled | ManagedEnvError::Internal(_) => {
                ConditionReason::InternalError
            }
        }
    }

    /// Stable message published for this kind of failure
    #[must_use]
    pub fn condition_message(&self) -> &'static str {
        match self {
            ManagedEnvError::Validation(_) | ManagedEnvError::Permission(_) => {
                INVALID_CREDENTIALS_MESSAGE
            }
            ManagedEnvError::Timeout(_) => TOKEN_TIMEOUT_MESSAGE,
            ManagedEnvError::Unreachable(_) => CLUSTER_UNREACHABLE_MESSAGE,
            ManagedEnvError::Cancelled | ManagedEnvError::Internal(_) => INTERNAL_ERROR_MESSAGE,
        }
    }

    /// Whether the runtime should retry with backoff rather than wait for the next change
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ManagedEnvError::Validation(_) | ManagedEnvError::Cancelled
        )
    }

    /// `ErrorOccurred=True` condition describing this failure
    #[must_use]
    pub fn condition(&self) -> Condition {
        Condition::new(
            CONDITION_ERROR_OCCURRED,
            ConditionStatus::True,
            self.reason(),
            self.condition_message(),
        )
    }
}

impl From<RemoteClusterError> for ManagedEnvError {
    fn from(error: RemoteClusterError) -> Self {
        match error {
            RemoteClusterError::Unauthorized(_) | RemoteClusterError::Forbidden(_) => {
                ManagedEnvError::Permission(error.to_string())
            }
            RemoteClusterError::Unreachable(_) => ManagedEnvError::Unreachable(error.to_string()),
            RemoteClusterError::Api { code, .. } if code >= 500 => {
                ManagedEnvError::Unreachable(error.to_string())
            }
            // Missing namespace or a rejected apply: the controller's setup is at fault
            RemoteClusterError::Api {
                code: 404 | 409 | 422,
                ..
            } => ManagedEnvError::Internal(error.to_string()),
            RemoteClusterError::Api { .. } => ManagedEnvError::Permission(error.to_string()),
            RemoteClusterError::InvalidConfig(_) => ManagedEnvError::Validation(error.to_string()),
        }
    }
}

impl From<CredentialError> for ManagedEnvError {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::Validation(detail) => ManagedEnvError::Validation(detail),
            CredentialError::Timeout { .. } => ManagedEnvError::Timeout(error.to_string()),
            CredentialError::Cancelled => ManagedEnvError::Cancelled,
            CredentialError::Remote(remote) => remote.into(),
        }
    }
}

impl From<MappingError> for ManagedEnvError {
    fn from(error: MappingError) -> Self {
        ManagedEnvError::Internal(error.to_string())
    }
}

impl From<RegistrationError> for ManagedEnvError {
    fn from(error: RegistrationError) -> Self {
        ManagedEnvError::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_credential_failures_share_fixed_message() {
        let empty_token = ManagedEnvError::from(CredentialError::Validation("empty token".into()));
        let read_only = ManagedEnvError::from(RemoteClusterError::Forbidden("cannot list".into()));

        assert_eq!(empty_token.condition_message(), INVALID_CREDENTIALS_MESSAGE);
        assert_eq!(read_only.condition_message(), INVALID_CREDENTIALS_MESSAGE);
        assert_eq!(empty_token.condition(), read_only.condition());
        assert_eq!(empty_token.reason(), ConditionReason::ErrorOccurred);
    }

    #[test]
    fn test_remote_errors_are_classified() {
        assert!(matches!(
            ManagedEnvError::from(RemoteClusterError::Unauthorized("x".into())),
            ManagedEnvError::Permission(_)
        ));
        assert!(matches!(
            ManagedEnvError::from(RemoteClusterError::Unreachable("x".into())),
            ManagedEnvError::Unreachable(_)
        ));
        assert!(matches!(
            ManagedEnvError::from(RemoteClusterError::Api {
                code: 503,
                message: "x".into()
            }),
            ManagedEnvError::Unreachable(_)
        ));
        assert!(matches!(
            ManagedEnvError::from(RemoteClusterError::Api {
                code: 400,
                message: "x".into()
            }),
            ManagedEnvError::Permission(_)
        ));
    }

    #[test]
    fn test_configuration_faults_are_internal() {
        for code in [404, 409, 422] {
            let error = ManagedEnvError::from(RemoteClusterError::Api {
                code,
                message: "namespaces \"kube-system-typo\" not found".into(),
            });
            assert!(matches!(error, ManagedEnvError::Internal(_)), "code {code}");
            assert!(error.is_retryable());
            assert_ne!(error.condition_message(), INVALID_CREDENTIALS_MESSAGE);
        }
    }

    #[test]
    fn test_timeout_condition() {
        let error = ManagedEnvError::from(CredentialError::Timeout {
            token_secret: "argocd-manager-token-1".into(),
            waited: Duration::from_secs(60),
        });
        let condition = error.condition();
        assert!(condition.is_true());
        assert_eq!(condition.reason.as_deref(), Some("TokenTimeout"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_waits_for_change() {
        assert!(!ManagedEnvError::Validation("x".into()).is_retryable());
        assert!(!ManagedEnvError::Cancelled.is_retryable());
        assert!(ManagedEnvError::Permission("x".into()).is_retryable());
    }
}
