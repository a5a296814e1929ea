//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use managed_environment_controller::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Store and connector traits - needed for alternative backends
pub use crate::controller::conditions::ConditionReporter;
pub use crate::controller::credentials::{RemoteCluster, RemoteClusterConnector};
pub use crate::controller::mapping::IdentityMappingStore;
pub use crate::controller::registration::RegistrationStore;

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, BackoffState, ManagedEnvError, ManagedEnvironmentReconciler, ReconcileReport,
    Reconciler, ReconcilerError,
};

// Config types
pub use crate::config::{ControllerConfig, LogFormat, MappingBackend};
