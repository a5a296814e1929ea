//! # Custom Resource Definitions
//!
//! CRD types for the Managed Environment Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `GitOpsDeploymentManagedEnvironment` spec
//! - `status.rs` - Status, conditions and phases

mod spec;
mod status;

// Re-export all public types
pub use spec::{
    default_false, GitOpsDeploymentManagedEnvironment, ManagedEnvironment, ManagedEnvironmentSpec,
};
pub use status::{
    Condition, ConditionReason, ConditionStatus, ManagedEnvironmentStatus, ReconcilePhase,
};
