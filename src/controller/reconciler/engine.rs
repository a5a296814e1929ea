//! # Managed-Environment Reconciler
//!
//! Idempotent entry points driven by the runtime (or directly by tests):
//!
//! - [`ManagedEnvironmentReconciler::reconcile`] converges one resource towards a written
//!   cluster registration and publishes the outcome.
//! - [`ManagedEnvironmentReconciler::cleanup`] removes the registration and the identity
//!   mapping once the resource is being deleted.
//! - [`ManagedEnvironmentReconciler::report_failure`] publishes a failure that happened
//!   before convergence could start.
//!
//! ## Reconciliation Flow
//!
//! 1. Validate the spec
//! 2. Read the credential Secret
//! 3. Resolve connection material (optionally provisioning a service account)
//! 4. Probe the target cluster with the resolved material
//! 5. Get or create the identity mapping
//! 6. Synthesize the cluster registration
//! 7. Publish `ErrorOccurred`
//!
//! Every store handle is injected, so nothing here needs a live cluster.

use super::errors::ManagedEnvError;
use super::state::{transition, InvalidTransition, ReconcileEvent};
use super::validation::validate_spec;
use crate::constants::{MANAGED_ENVIRONMENT_KIND, MANAGED_ENVIRONMENT_RELATION};
use crate::controller::conditions::{
    success_condition, ConditionReporter, ResourceRef, StatusError, StatusUpdate,
};
use crate::controller::credentials::{CredentialResolver, CredentialSecret, ResolveRequest};
use crate::controller::mapping::{IdentityMappingStore, MappingTriple};
use crate::controller::registration::{
    ClusterRegistrationSynthesizer, NamespaceRestriction, RegistrationHandle, SynthesisOutcome,
};
use crate::crd::{Condition, ManagedEnvironment, ReconcilePhase};
use crate::observability;
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failure to record an outcome, as opposed to the outcome itself being a failure
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Result of one reconciliation attempt
#[derive(Debug)]
pub struct ReconcileReport {
    pub phase: ReconcilePhase,
    /// Published condition; `None` when the attempt was cancelled
    pub condition: Option<Condition>,
    pub outcome: Result<RegistrationHandle, ManagedEnvError>,
    /// Whether the stored status changed
    pub status_changed: bool,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == ReconcilePhase::Ready
    }
}

/// Mapping row of a managed environment
#[must_use]
pub fn mapping_triple(resource: &ResourceRef) -> MappingTriple {
    MappingTriple::new(
        MANAGED_ENVIRONMENT_KIND,
        resource.uid.as_str(),
        MANAGED_ENVIRONMENT_RELATION,
    )
}

/// Phase an attempt starts in
///
/// A stored Deleting without a deletion timestamp means the resource was recreated under
/// the same name; start over.
fn validating_phase(env: &ManagedEnvironment) -> Result<ReconcilePhase, InvalidTransition> {
    let stored = env.status.as_ref().and_then(|s| s.phase);
    transition(stored, ReconcileEvent::Observed)
        .or_else(|_| transition(None, ReconcileEvent::Observed))
}

/// Report for a resource without namespace or uid; there is nowhere to publish it
fn unaddressable(validating: ReconcilePhase) -> Result<ReconcileReport, ReportError> {
    let error = ManagedEnvError::Validation("resource has no namespace or uid".to_string());
    Ok(ReconcileReport {
        phase: transition(Some(validating), ReconcileEvent::Failed)?,
        condition: Some(error.condition()),
        outcome: Err(error),
        status_changed: false,
    })
}

#[derive(Clone)]
pub struct ManagedEnvironmentReconciler {
    mapping: Arc<dyn IdentityMappingStore>,
    resolver: CredentialResolver,
    synthesizer: ClusterRegistrationSynthesizer,
    reporter: Arc<dyn ConditionReporter>,
}

impl std::fmt::Debug for ManagedEnvironmentReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedEnvironmentReconciler")
            .field("resolver", &self.resolver)
            .field("synthesizer", &self.synthesizer)
            .finish_non_exhaustive()
    }
}

impl ManagedEnvironmentReconciler {
    pub fn new(
        mapping: Arc<dyn IdentityMappingStore>,
        resolver: CredentialResolver,
        synthesizer: ClusterRegistrationSynthesizer,
        reporter: Arc<dyn ConditionReporter>,
    ) -> Self {
        Self {
            mapping,
            resolver,
            synthesizer,
            reporter,
        }
    }

    #[must_use]
    pub fn synthesizer(&self) -> &ClusterRegistrationSynthesizer {
        &self.synthesizer
    }

    /// Converge `env` and publish the outcome
    ///
    /// `secret` is the credential Secret named by the spec, `None` when it does not exist.
    /// Failures of the environment are part of the report; only a failure to record the
    /// outcome is returned as an error.
    pub async fn reconcile(
        &self,
        env: &ManagedEnvironment,
        secret: Option<&Secret>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, ReportError> {
        let start = Instant::now();
        observability::metrics::increment_reconciliations();

        let validating = validating_phase(env)?;
        let Some(resource) = ResourceRef::from_resource(env) else {
            return unaddressable(validating);
        };
        let triple = mapping_triple(&resource);
        debug!(resource = %resource, phase = validating.as_str(), "reconcile.started");

        let outcome = self.converge(env, &resource, &triple, secret, cancel).await;
        self.conclude(env, &resource, &triple, validating, outcome, start).await
    }

    /// Record a failure that stopped the attempt before convergence started
    ///
    /// The runtime uses this when it cannot prepare the attempt, for example when the
    /// credential Secret cannot be read. The outcome is published exactly like a failed
    /// convergence: the registration is withdrawn and `ErrorOccurred` is set.
    pub async fn report_failure(
        &self,
        env: &ManagedEnvironment,
        error: ManagedEnvError,
    ) -> Result<ReconcileReport, ReportError> {
        let start = Instant::now();
        observability::metrics::increment_reconciliations();

        let validating = validating_phase(env)?;
        let Some(resource) = ResourceRef::from_resource(env) else {
            return unaddressable(validating);
        };
        let triple = mapping_triple(&resource);
        self.conclude(env, &resource, &triple, validating, Err(error), start).await
    }

    async fn conclude(
        &self,
        env: &ManagedEnvironment,
        resource: &ResourceRef,
        triple: &MappingTriple,
        validating: ReconcilePhase,
        outcome: Result<RegistrationHandle, ManagedEnvError>,
        start: Instant,
    ) -> Result<ReconcileReport, ReportError> {
        let outcome = match outcome {
            Err(ManagedEnvError::Cancelled) => {
                info!(resource = %resource, "reconcile.cancelled");
                return Ok(ReconcileReport {
                    phase: validating,
                    condition: None,
                    outcome: Err(ManagedEnvError::Cancelled),
                    status_changed: false,
                });
            }
            other => other,
        };

        let (event, condition, cluster_secret_name) = match &outcome {
            Ok(handle) => (
                ReconcileEvent::Succeeded,
                success_condition(),
                Some(handle.name.clone()),
            ),
            Err(error) => (ReconcileEvent::Failed, error.condition(), None),
        };
        let outcome = match outcome {
            Err(error) => Err(self.withdraw_registration(resource, triple, error).await),
            ok => ok,
        };
        let phase = transition(Some(validating), event)?;

        let update = StatusUpdate {
            phase,
            condition: Some(condition.clone()),
            observed_generation: env.metadata.generation,
            cluster_secret_name,
        };
        let status_changed = self.reporter.publish(resource, &update).await?;
        if status_changed {
            observability::metrics::increment_status_updates();
        }

        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        match &outcome {
            Ok(handle) => info!(
                resource = %resource,
                registration.name = handle.name.as_str(),
                registration.outcome = handle.outcome.as_str(),
                duration_ms = start.elapsed().as_millis(),
                "reconcile.ready"
            ),
            Err(err) => {
                observability::metrics::increment_reconciliation_errors(err.kind());
                warn!(
                    resource = %resource,
                    error.kind = err.kind(),
                    error = %err,
                    reason = condition.reason.as_deref().unwrap_or_default(),
                    "reconcile.failed"
                );
            }
        }

        Ok(ReconcileReport {
            phase,
            condition: Some(condition),
            outcome,
            status_changed,
        })
    }

    async fn converge(
        &self,
        env: &ManagedEnvironment,
        resource: &ResourceRef,
        triple: &MappingTriple,
        secret: Option<&Secret>,
        cancel: &CancellationToken,
    ) -> Result<RegistrationHandle, ManagedEnvError> {
        let spec = &env.spec;
        validate_spec(spec)?;

        let secret = secret.ok_or_else(|| {
            ManagedEnvError::Validation(format!(
                "credential Secret '{}' not found in namespace '{}'",
                spec.credentials_secret, resource.namespace
            ))
        })?;
        let credentials = CredentialSecret::from_secret(secret)?;

        let material = self
            .resolver
            .resolve(
                ResolveRequest {
                    secret: &credentials,
                    provision_new: spec.create_new_service_account,
                    api_url: &spec.api_url,
                    allow_insecure: spec.allow_insecure_skip_tls_verify,
                    identity_suffix: &resource.uid,
                },
                cancel,
            )
            .await?;

        let remote = self.resolver.connector().connect(&material).await?;
        remote.verify_access(&spec.namespaces).await?;

        // Deletion may have started while we were talking to the target cluster
        if cancel.is_cancelled() {
            return Err(ManagedEnvError::Cancelled);
        }

        let key = self.mapping.get_or_create(triple).await?;
        let restriction = NamespaceRestriction {
            namespaces: spec.namespaces.clone(),
            cluster_resources: spec.cluster_resources,
        };
        let handle = self
            .synthesizer
            .synthesize(&key, &material, spec.allow_insecure_skip_tls_verify, &restriction)
            .await?;
        if handle.outcome == SynthesisOutcome::Created {
            observability::metrics::increment_registrations_managed();
        }
        Ok(handle)
    }

    /// Remove the registration after a failure, keeping the mapping
    ///
    /// The registration must not outlive a failed reconciliation. If removing it fails the
    /// attempt becomes retryable so the removal is tried again.
    async fn withdraw_registration(
        &self,
        resource: &ResourceRef,
        triple: &MappingTriple,
        cause: ManagedEnvError,
    ) -> ManagedEnvError {
        let key = match self.mapping.lookup(triple).await {
            Ok(Some(key)) => key,
            Ok(None) => return cause,
            Err(e) => {
                error!(resource = %resource, error = %e, "Failed to look up mapping while withdrawing registration");
                return ManagedEnvError::Internal(format!("{cause}; mapping lookup failed: {e}"));
            }
        };
        match self.synthesizer.remove(&key).await {
            Ok(removed) => {
                if removed {
                    observability::metrics::decrement_registrations_managed();
                    info!(resource = %resource, key = %key, "reconcile.registration_withdrawn");
                }
                cause
            }
            Err(e) => {
                error!(resource = %resource, error = %e, "Failed to withdraw registration");
                ManagedEnvError::Internal(format!("{cause}; registration removal failed: {e}"))
            }
        }
    }

    /// Tear down everything `env` produced
    ///
    /// Absent registrations and mappings count as removed, so this is safe to repeat and to
    /// run while a creation attempt is still in flight.
    pub async fn cleanup(&self, env: &ManagedEnvironment) -> Result<ReconcilePhase, ManagedEnvError> {
        let stored = env.status.as_ref().and_then(|s| s.phase);
        let deleting = transition(stored, ReconcileEvent::DeletionRequested)
            .map_err(|e| ManagedEnvError::Internal(e.to_string()))?;

        let Some(resource) = ResourceRef::from_resource(env) else {
            return transition(Some(deleting), ReconcileEvent::CleanedUp)
                .map_err(|e| ManagedEnvError::Internal(e.to_string()));
        };

        if stored != Some(ReconcilePhase::Deleting) {
            let update = StatusUpdate {
                phase: deleting,
                condition: None,
                observed_generation: env.metadata.generation,
                cluster_secret_name: env
                    .status
                    .as_ref()
                    .and_then(|s| s.cluster_secret_name.clone()),
            };
            if let Err(e) = self.reporter.publish(&resource, &update).await {
                warn!(resource = %resource, error = %e, "Failed to publish Deleting phase");
            }
        }

        let triple = mapping_triple(&resource);
        if let Some(key) = self.mapping.lookup(&triple).await? {
            if self.synthesizer.remove(&key).await? {
                observability::metrics::decrement_registrations_managed();
            }
            self.mapping.delete(&triple).await?;
            info!(resource = %resource, key = %key, "cleanup.completed");
        } else {
            debug!(resource = %resource, "cleanup.nothing_to_remove");
        }

        transition(Some(deleting), ReconcileEvent::CleanedUp)
            .map_err(|e| ManagedEnvError::Internal(e.to_string()))
    }
}
