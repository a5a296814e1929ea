//! # Watch Loop
//!
//! Controller watch loop that monitors `GitOpsDeploymentManagedEnvironment` resources, and
//! the credential Secrets they reference, and triggers reconciliation on change.

use crate::constants::{
    CREDENTIAL_SECRET_TYPE, DEFAULT_WATCH_BACKOFF_MAX_MS, DEFAULT_WATCH_BACKOFF_START_MS,
};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::ManagedEnvironment;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller, WatchStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Run the controller watch loop
///
/// Restarts the controller stream whenever it ends, until a shutdown signal marks the
/// server as not ready.
pub async fn run_watch_loop(
    envs: Api<ManagedEnvironment>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_duration_ms = Arc::new(AtomicU64::new(DEFAULT_WATCH_BACKOFF_START_MS));
    let watch_restart_delay = reconciler.config.watch_restart_delay();
    let controller_namespace = reconciler.config.controller_namespace.clone();

    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");

        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let deletion_watch = spawn_deletion_watch(envs.clone(), reconciler.clone());

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff_clone = backoff_duration_ms.clone();
        let namespace_for_filter = controller_namespace.clone();
        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        let controller = Controller::new(envs.clone(), watcher::Config::default().any_semantic());
        let store = controller.store();
        let secrets: Api<Secret> = Api::all(reconciler.client.clone());
        let secret_watch_config =
            watcher::Config::default().fields(&format!("type={CREDENTIAL_SECRET_TYPE}"));

        let controller_future = controller
            .watches(secrets, secret_watch_config, move |secret: Secret| {
                environments_referencing(store.state(), &secret)
            })
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, reconciler.clone())
            .filter_map(move |x| {
                let backoff = backoff_clone.clone();
                let controller_namespace = namespace_for_filter.clone();
                async move {
                    match &x {
                        Ok((object_ref, _action)) => {
                            backoff.store(DEFAULT_WATCH_BACKOFF_START_MS, Ordering::Relaxed);
                            debug!(resource = %object_ref, "watch.event.reconciled");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &controller_namespace,
                                &backoff,
                                DEFAULT_WATCH_BACKOFF_MAX_MS,
                                watch_restart_delay.as_secs(),
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()));

        controller_future.instrument(watch_span).await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            watch_restart_delay.as_secs()
        );
        tokio::time::sleep(watch_restart_delay).await;
    }

    deletion_watch.abort();
    info!("Controller stopped gracefully");
    Ok(())
}

/// Managed environments in the Secret's namespace that name it as their credentials
pub fn environments_referencing(
    envs: impl IntoIterator<Item = Arc<ManagedEnvironment>>,
    secret: &Secret,
) -> Vec<ObjectRef<ManagedEnvironment>> {
    let Some(secret_namespace) = secret.namespace() else {
        return Vec::new();
    };
    let secret_name = secret.name_any();

    envs.into_iter()
        .filter(|env| {
            env.namespace().as_deref() == Some(secret_namespace.as_str())
                && env.spec.credentials_secret == secret_name
        })
        .map(|env| ObjectRef::from_obj(env.as_ref()))
        .collect()
}

/// Cancel in-flight attempts as soon as a managed environment starts deleting
///
/// The controller never runs two reconciles of one object at once, so the deletion event
/// would otherwise wait behind a token poll that may take up to its full timeout.
fn spawn_deletion_watch(
    envs: Api<ManagedEnvironment>,
    reconciler: Arc<Reconciler>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let stream = watcher(envs, watcher::Config::default())
            .default_backoff()
            .applied_objects();
        futures::pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(env) if env.metadata.deletion_timestamp.is_some() => {
                    if let Some(uid) = env.uid() {
                        if reconciler.cancellations.cancel(&uid) {
                            info!(
                                resource.name = env.name_any().as_str(),
                                resource.uid = uid.as_str(),
                                "Cancelled in-flight reconciliation of deleted managed environment"
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Deletion watch error"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ManagedEnvironmentSpec;

    fn env(namespace: &str, name: &str, secret: &str) -> Arc<ManagedEnvironment> {
        let mut env = ManagedEnvironment::new(
            name,
            ManagedEnvironmentSpec {
                api_url: "https://api.example.com".to_string(),
                credentials_secret: secret.to_string(),
                allow_insecure_skip_tls_verify: false,
                create_new_service_account: false,
                namespaces: Vec::new(),
                cluster_resources: false,
            },
        );
        env.metadata.namespace = Some(namespace.to_string());
        Arc::new(env)
    }

    fn secret(namespace: &str, name: &str) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        secret
    }

    #[test]
    fn test_secret_maps_to_referencing_environments() {
        let envs = vec![
            env("team-a", "staging", "creds"),
            env("team-a", "prod", "prod-creds"),
            env("team-b", "staging", "creds"),
            env("team-a", "qa", "creds"),
        ];

        let mut names: Vec<String> = environments_referencing(envs, &secret("team-a", "creds"))
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();

        assert_eq!(names, vec!["qa".to_string(), "staging".to_string()]);
    }

    #[test]
    fn test_secret_without_namespace_maps_to_nothing() {
        let mut orphan = secret("team-a", "creds");
        orphan.metadata.namespace = None;
        assert!(environments_referencing(vec![env("team-a", "staging", "creds")], &orphan).is_empty());
    }
}
