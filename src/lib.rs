//! Managed Environment Controller Library
//!
//! Turns `GitOpsDeploymentManagedEnvironment` resources into Argo CD cluster registrations,
//! provisioning a dedicated service account on the target cluster when asked to.
//!
//! ## Quick Start
//!
//! ```rust
//! use managed_environment_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
