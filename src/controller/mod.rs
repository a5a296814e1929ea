//! # Controller
//!
//! Core controller modules for the managed-environment controller.
//!
//! - `backoff`: Fibonacci backoff for retries and token polling
//! - `mapping`: Identity mapping store (resource triple to internal key)
//! - `credentials`: Credential resolution and service account provisioning
//! - `registration`: Argo CD cluster registration synthesis
//! - `conditions`: Status and condition publishing
//! - `reconciler`: Reconciliation state machine and runtime glue

pub mod backoff;
pub mod conditions;
pub mod credentials;
pub mod mapping;
pub mod reconciler;
pub mod registration;
