//! # Types
//!
//! Runtime context and error types for the reconciler.

use super::cancellation::CancellationRegistry;
use super::engine::{ManagedEnvironmentReconciler, ReportError};
use super::errors::ManagedEnvError;
use crate::config::{ControllerConfig, MappingBackend};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::conditions::KubeConditionReporter;
use crate::controller::credentials::{
    CredentialResolver, KubeRemoteClusterConnector, TokenPollSettings,
};
use crate::controller::mapping::{
    ConfigMapMappingStore, IdentityMappingStore, InMemoryMappingStore,
};
use crate::controller::registration::{ClusterRegistrationSynthesizer, KubeRegistrationStore};
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    Environment(#[from] ManagedEnvError),
    #[error("Failed to record reconciliation outcome: {0}")]
    Report(#[from] ReportError),
    #[error("Kubernetes request failed: {0}")]
    Kube(#[from] kube::Error),
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            backoff: FibonacciBackoff::from_secs(config.backoff_min_secs, config.backoff_max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub core: Arc<ManagedEnvironmentReconciler>,
    pub config: ControllerConfig,
    // Backoff state per resource (identified by namespace/name), driven by error_policy()
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    // In-flight attempts per resource uid, cancelled when deletion starts
    pub cancellations: CancellationRegistry,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("in_flight", &self.cancellations.in_flight())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Wire the reconciler against the hub cluster `client`
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        let mapping: Arc<dyn IdentityMappingStore> = match config.mapping_backend {
            MappingBackend::ConfigMap => {
                info!(
                    namespace = config.controller_namespace.as_str(),
                    "Identity mappings stored as ConfigMaps"
                );
                Arc::new(ConfigMapMappingStore::new(
                    client.clone(),
                    &config.controller_namespace,
                ))
            }
            MappingBackend::Memory => {
                // A restart mints new keys; cluster Secrets written under the old ones are
                // orphaned in the Argo CD namespace
                warn!("Identity mappings kept in memory - they do not survive a restart");
                Arc::new(InMemoryMappingStore::new())
            }
        };

        let resolver = CredentialResolver::new(
            Arc::new(KubeRemoteClusterConnector),
            &config.service_account_namespace,
            TokenPollSettings::from_config(&config),
        );
        let synthesizer = ClusterRegistrationSynthesizer::new(
            Arc::new(KubeRegistrationStore::new(
                client.clone(),
                &config.argocd_namespace,
            )),
            &config.argocd_namespace,
        );
        let core = ManagedEnvironmentReconciler::new(
            mapping,
            resolver,
            synthesizer,
            Arc::new(KubeConditionReporter::new(client.clone())),
        );

        Self {
            client,
            core: Arc::new(core),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            cancellations: CancellationRegistry::new(),
        }
    }

    /// Forget the backoff of `resource_key`; returns true if it had failed before
    pub fn reset_backoff(&self, resource_key: &str) -> bool {
        self.backoff_states
            .lock()
            .ok()
            .and_then(|mut states| {
                states.get_mut(resource_key).map(|state| {
                    let had_errors = state.error_count > 0;
                    state.reset();
                    had_errors
                })
            })
            .unwrap_or(false)
    }

    pub fn forget_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}
