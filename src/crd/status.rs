//! # ManagedEnvironment Status
//!
//! Status types for tracking reconciliation state and conditions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the GitOpsDeploymentManagedEnvironment resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedEnvironmentStatus {
    /// Current phase of reconciliation
    /// Values: Validating, Ready, Error, Deleting
    #[serde(default)]
    pub phase: Option<ReconcilePhase>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation of the spec the conditions were computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last reconciliation time (RFC3339)
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    /// Name of the cluster registration Secret in the sync-engine namespace
    #[serde(default)]
    pub cluster_secret_name: Option<String>,
}

/// Lifecycle phase of a managed environment
///
/// `Validating` is re-entered on every observed change; `Deleting` is reachable from any
/// phase once the resource is marked for removal. `Terminated` is never persisted because
/// the resource is gone by then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ReconcilePhase {
    Validating,
    Ready,
    Error,
    Deleting,
    Terminated,
}

impl ReconcilePhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePhase::Validating => "Validating",
            ReconcilePhase::Ready => "Ready",
            ReconcilePhase::Error => "Error",
            ReconcilePhase::Deleting => "Deleting",
            ReconcilePhase::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// Stable reasons published on the `ErrorOccurred` condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionReason {
    /// Last reconciliation succeeded
    Succeeded,
    /// Credentials missing, malformed or lacking rights
    ErrorOccurred,
    /// Provisioned service account never received a token
    TokenTimeout,
    /// Target API server could not be reached
    ClusterUnreachable,
    /// Unexpected controller-side failure
    InternalError,
}

impl ConditionReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::Succeeded => "Succeeded",
            ConditionReason::ErrorOccurred => "ErrorOccurred",
            ConditionReason::TokenTimeout => "TokenTimeout",
            ConditionReason::ClusterUnreachable => "ClusterUnreachable",
            ConditionReason::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    /// Build a condition without a transition time; the reporter stamps it on publish
    #[must_use]
    pub fn new(
        r#type: &str,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: status.as_str().to_string(),
            last_transition_time: None,
            reason: Some(reason.as_str().to_string()),
            message: Some(message.into()),
        }
    }

    /// Whether type, status, reason and message all match, ignoring the timestamp
    #[must_use]
    pub fn same_observation(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True.as_str()
    }
}
