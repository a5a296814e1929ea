//! # Reconcile
//!
//! Entry point called by the controller runtime for every observed change. Handles the
//! finalizer and the credential Secret lookup, then hands over to
//! [`ManagedEnvironmentReconciler`](super::engine::ManagedEnvironmentReconciler) and turns its
//! report into an [`Action`].

use super::errors::ManagedEnvError;
use super::types::{Reconciler, ReconcilerError};
use super::validation::validate_secret_name;
use crate::constants::{FIELD_MANAGER, MANAGED_ENVIRONMENT_FINALIZER};
use crate::crd::ManagedEnvironment;
use crate::observability;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Reconcile one managed environment
pub async fn reconcile(
    env: Arc<ManagedEnvironment>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = env.name_any();
    let namespace = env.namespace().unwrap_or_default();
    let uid = env.uid().unwrap_or_default();

    let span = tracing::info_span!(
        "controller.reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        resource.uid = uid.as_str(),
        resource.generation = env.metadata.generation.unwrap_or(0),
    );

    async move {
        if env.metadata.deletion_timestamp.is_some() {
            return handle_deletion(&env, &ctx).await;
        }

        let report = match prepare(&ctx, &env).await {
            Ok(secret) => {
                let attempt = ctx.cancellations.register(&uid);
                let report = ctx.core.reconcile(&env, secret.as_ref(), attempt.token()).await?;
                drop(attempt);
                report
            }
            Err(error) => ctx.core.report_failure(&env, error).await?,
        };

        let resource_key = format!("{namespace}/{name}");
        match report.outcome {
            Ok(_) => {
                if ctx.reset_backoff(&resource_key) {
                    info!("Backoff reset: returning to the resync interval");
                }
                observability::metrics::increment_requeues_total("resync");
                Ok(Action::requeue(ctx.config.resync_interval()))
            }
            Err(error) if !error.is_retryable() => {
                debug!(error.kind = error.kind(), "Waiting for the resource or its Secret to change");
                observability::metrics::increment_requeues_total("await-change");
                Ok(Action::await_change())
            }
            Err(error) => Err(error.into()),
        }
    }
    .instrument(span)
    .await
}

/// Finalizer and credential Secret, everything an attempt needs from the hub cluster
async fn prepare(
    ctx: &Reconciler,
    env: &ManagedEnvironment,
) -> Result<Option<Secret>, ManagedEnvError> {
    if !has_finalizer(env) {
        add_finalizer(ctx, env)
            .await
            .map_err(|e| hub_request_failed("adding the cleanup finalizer", &e))?;
        debug!("Added cleanup finalizer");
    }
    fetch_credential_secret(ctx, env)
        .await
        .map_err(|e| hub_request_failed("reading the credential Secret", &e))
}

/// Failure of a request against the hub cluster
///
/// The controller's own access is at fault, not the environment's credentials, so this is
/// retried with backoff.
pub(crate) fn hub_request_failed(action: &str, error: &kube::Error) -> ManagedEnvError {
    warn!(error = %error, "Hub cluster request failed while {action}");
    ManagedEnvError::Internal(format!("{action}: {error}"))
}

/// Read the credential Secret named by the spec
///
/// Returns `None` when it does not exist or the name could never resolve; the reconciler
/// turns that into a validation failure.
async fn fetch_credential_secret(
    ctx: &Reconciler,
    env: &ManagedEnvironment,
) -> Result<Option<Secret>, kube::Error> {
    let secret_name = env.spec.credentials_secret.as_str();
    if validate_secret_name(secret_name).is_err() {
        return Ok(None);
    }
    let Some(namespace) = env.namespace() else {
        return Ok(None);
    };
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    secrets.get_opt(secret_name).await
}

async fn handle_deletion(
    env: &ManagedEnvironment,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    if let Some(uid) = env.uid() {
        ctx.cancellations.cancel(&uid);
    }
    if !has_finalizer(env) {
        return Ok(Action::await_change());
    }

    let phase = ctx.core.cleanup(env).await?;
    remove_finalizer(ctx, env).await?;
    ctx.forget_backoff(&format!(
        "{}/{}",
        env.namespace().unwrap_or_default(),
        env.name_any()
    ));

    info!(phase = phase.as_str(), "Managed environment cleaned up");
    Ok(Action::await_change())
}

pub(crate) fn has_finalizer(env: &ManagedEnvironment) -> bool {
    env.finalizers()
        .iter()
        .any(|f| f == MANAGED_ENVIRONMENT_FINALIZER)
}

async fn add_finalizer(ctx: &Reconciler, env: &ManagedEnvironment) -> Result<(), kube::Error> {
    let api: Api<ManagedEnvironment> =
        Api::namespaced(ctx.client.clone(), &env.namespace().unwrap_or_default());

    let mut finalizers = env.finalizers().to_vec();
    if finalizers.iter().any(|f| f == MANAGED_ENVIRONMENT_FINALIZER) {
        return Ok(());
    }
    finalizers.push(MANAGED_ENVIRONMENT_FINALIZER.to_string());

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        &env.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer(ctx: &Reconciler, env: &ManagedEnvironment) -> Result<(), kube::Error> {
    let api: Api<ManagedEnvironment> =
        Api::namespaced(ctx.client.clone(), &env.namespace().unwrap_or_default());

    let finalizers: Vec<String> = env
        .finalizers()
        .iter()
        .filter(|f| *f != MANAGED_ENVIRONMENT_FINALIZER)
        .cloned()
        .collect();
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    match api
        .patch(
            &env.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
        Err(e) => Err(e),
    }
}
