//! # Reconciler
//!
//! Reconciliation of `GitOpsDeploymentManagedEnvironment` resources.
//!
//! The reconciler:
//! - Watches managed environments across all namespaces, and the credential Secrets they name
//! - Resolves connection material, provisioning a service account on request
//! - Writes the Argo CD cluster registration for the environment
//! - Publishes the outcome as the `ErrorOccurred` condition
//! - Removes the registration and the identity mapping on deletion
//!
//! `engine` holds the store-agnostic logic; `reconcile` is the glue to the controller runtime.

pub mod cancellation;
pub mod engine;
pub mod errors;
pub mod reconcile;
pub mod state;
pub mod types;
pub mod validation;

pub use cancellation::{AttemptGuard, CancellationRegistry};
pub use engine::{mapping_triple, ManagedEnvironmentReconciler, ReconcileReport, ReportError};
pub use errors::ManagedEnvError;
pub use reconcile::reconcile;
pub use state::{transition, InvalidTransition, ReconcileEvent};
pub use types::{BackoffState, Reconciler, ReconcilerError};
