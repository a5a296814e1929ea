//! # Condition Reporter
//!
//! Publishes the outcome of a reconciliation onto the resource's status. A condition
//! overwrites the one of the same type (last write wins) and no history is kept.
//!
//! Publishing is a read-compare-write: when nothing observable changes the write is
//! skipped, so a steady-state resync does not generate watch events of its own.

mod kubernetes;
mod memory;

pub use kubernetes::KubeConditionReporter;
pub use memory::InMemoryConditionReporter;

use crate::constants::CONDITION_ERROR_OCCURRED;
use crate::crd::{
    Condition, ConditionReason, ConditionStatus, ManagedEnvironment, ManagedEnvironmentStatus,
    ReconcilePhase,
};
use async_trait::async_trait;
use kube::ResourceExt;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status request failed: {0}")]
    Api(#[from] kube::Error),
    #[error("failed to serialize status: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Identity of the resource a status is published on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl ResourceRef {
    /// `None` for objects not yet persisted (no namespace or uid)
    #[must_use]
    pub fn from_resource(env: &ManagedEnvironment) -> Option<Self> {
        Some(Self {
            namespace: env.namespace()?,
            name: env.name_any(),
            uid: env.uid()?,
        })
    }

    /// `namespace/name`, the key used for per-resource runtime state
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One status publication
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub phase: ReconcilePhase,
    /// `None` keeps the stored conditions as they are
    pub condition: Option<Condition>,
    pub observed_generation: Option<i64>,
    pub cluster_secret_name: Option<String>,
}

/// `ErrorOccurred=False` published after a successful reconciliation
#[must_use]
pub fn success_condition() -> Condition {
    Condition::new(
        CONDITION_ERROR_OCCURRED,
        ConditionStatus::False,
        ConditionReason::Succeeded,
        "",
    )
}

/// Compute the status after `update`, or `None` when it would change nothing
///
/// `lastTransitionTime` moves only when a condition's status flips; `lastReconcileTime`
/// moves only when something else changed.
#[must_use]
pub fn apply_update(
    current: Option<&ManagedEnvironmentStatus>,
    update: &StatusUpdate,
    now: &str,
) -> Option<ManagedEnvironmentStatus> {
    let existing = current.cloned().unwrap_or_default();

    let mut conditions = existing.conditions.clone();
    if let Some(condition) = &update.condition {
        let mut condition = condition.clone();
        match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
            Some(stored) => {
                condition.last_transition_time = if stored.status == condition.status {
                    stored
                        .last_transition_time
                        .clone()
                        .or_else(|| Some(now.to_string()))
                } else {
                    Some(now.to_string())
                };
                *stored = condition;
            }
            None => {
                condition.last_transition_time = Some(now.to_string());
                conditions.push(condition);
            }
        }
    }

    let unchanged = existing.phase == Some(update.phase)
        && existing.observed_generation == update.observed_generation
        && existing.cluster_secret_name == update.cluster_secret_name
        && conditions.len() == existing.conditions.len()
        && conditions
            .iter()
            .zip(&existing.conditions)
            .all(|(a, b)| a.same_observation(b));
    if unchanged && current.is_some() {
        return None;
    }

    Some(ManagedEnvironmentStatus {
        phase: Some(update.phase),
        conditions,
        observed_generation: update.observed_generation,
        last_reconcile_time: Some(now.to_string()),
        cluster_secret_name: update.cluster_secret_name.clone(),
    })
}

/// Sink for reconciliation outcomes
#[async_trait]
pub trait ConditionReporter: Send + Sync {
    /// Publish `update` on `resource`
    /// Returns true if the stored status changed. A resource that no longer exists is not
    /// an error.
    async fn publish(&self, resource: &ResourceRef, update: &StatusUpdate)
        -> Result<bool, StatusError>;
}
