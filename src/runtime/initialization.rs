//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics, server
//! startup, and Kubernetes client setup.

use crate::config::{ControllerConfig, LogFormat};
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::Reconciler;
use crate::crd::{ManagedEnvironment, ReconcilePhase};
use crate::observability;
use crate::server::{start_server, ServerState};
use anyhow::{anyhow, Result};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client for the hub cluster
    pub client: Client,
    /// API for the managed environment CRD across all namespaces
    pub envs: Api<ManagedEnvironment>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self.server_state.is_ready.load(Ordering::Relaxed),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
/// - Startup summary of existing resources
///
/// Existing resources are reconciled by the controller's initial list once the watch loop
/// runs, alongside the deletion watch that can cancel them.
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any TLS connection is made; rustls 0.23 has no implicit provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_provider| anyhow!("Failed to install rustls crypto provider"))?;

    let config = ControllerConfig::from_env();
    init_tracing(config.log_format);

    info!("Starting Managed Environment Controller");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(?config, "Loaded controller configuration");

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());

    let server_state_clone = server_state.clone();
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Readiness probes should pass before the first reconcile
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default().await?;

    let envs: Api<ManagedEnvironment> = Api::all(client.clone());

    let reconciler = Arc::new(Reconciler::new(client.clone(), config.clone()));

    summarize_existing_resources(&envs).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        envs,
        reconciler,
        server_state,
        config,
    })
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "managed_environment_controller=info".into());

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    if let Err(e) = result {
        warn!("Tracing subscriber already initialized: {}", e);
    }
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Group resource names by namespace, sorted, for the startup summary
pub fn summarize_by_namespace(items: &[ManagedEnvironment]) -> BTreeMap<String, Vec<String>> {
    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        by_namespace
            .entry(item.namespace().unwrap_or_else(|| "default".to_string()))
            .or_default()
            .push(item.name_any());
    }
    for names in by_namespace.values_mut() {
        names.sort();
    }
    by_namespace
}

/// Render up to three names, then a total
pub fn format_resource_list(names: &[String]) -> String {
    if names.len() <= 3 {
        names.join(", ")
    } else {
        format!("{}, ... ({} total)", names[..3].join(", "), names.len())
    }
}

/// Number of environments whose stored phase is `Ready`
pub fn count_ready(items: &[ManagedEnvironment]) -> usize {
    items
        .iter()
        .filter(|env| env.status.as_ref().and_then(|s| s.phase) == Some(ReconcilePhase::Ready))
        .count()
}

/// Log the existing managed environments and seed the registrations gauge
///
/// Every environment already `Ready` owns one registration.
async fn summarize_existing_resources(envs: &Api<ManagedEnvironment>) {
    let span = tracing::info_span!(
        "controller.startup.summarize_existing",
        operation = "summarize_existing_resources"
    );

    async move {
        let list = match envs.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) => {
                error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
                error!("Installation: cargo run --bin crdgen | kubectl apply -f -");
                warn!("Continuing despite CRD queryability check failure - controller will retry");
                return;
            }
        };

        info!(
            "CRD is queryable, found {} existing GitOpsDeploymentManagedEnvironment resources",
            list.items.len()
        );
        if list.items.is_empty() {
            info!("No existing managed environments found, watch will pick up new resources");
            return;
        }

        let ready = count_ready(&list.items);
        observability::metrics::set_registrations_managed(i64::try_from(ready).unwrap_or(i64::MAX));

        let by_namespace = summarize_by_namespace(&list.items);
        info!("Managed Environment Controller - Startup Resource Summary");
        info!("Resource Kind: GitOpsDeploymentManagedEnvironment");
        info!("Total Resources: {} ({} Ready)", list.items.len(), ready);
        info!("Namespaces: {}", by_namespace.len());
        for (namespace, names) in &by_namespace {
            info!("Namespace: {}", namespace);
            info!("  Resources ({}): {}", names.len(), format_resource_list(names));
        }
    }
    .instrument(span)
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ManagedEnvironmentSpec, ManagedEnvironmentStatus};

    fn env(namespace: &str, name: &str) -> ManagedEnvironment {
        let mut env = ManagedEnvironment::new(
            name,
            ManagedEnvironmentSpec {
                api_url: "https://api.example.com".to_string(),
                credentials_secret: "creds".to_string(),
                allow_insecure_skip_tls_verify: false,
                create_new_service_account: false,
                namespaces: Vec::new(),
                cluster_resources: false,
            },
        );
        env.metadata.namespace = Some(namespace.to_string());
        env
    }

    #[test]
    fn test_summary_groups_and_sorts() {
        let summary = summarize_by_namespace(&[
            env("team-b", "prod"),
            env("team-a", "staging"),
            env("team-a", "dev"),
        ]);
        assert_eq!(summary.keys().collect::<Vec<_>>(), vec!["team-a", "team-b"]);
        assert_eq!(summary["team-a"], vec!["dev".to_string(), "staging".to_string()]);
    }

    #[test]
    fn test_count_ready_only_counts_ready_phase() {
        let mut ready = env("team-a", "staging");
        ready.status = Some(ManagedEnvironmentStatus {
            phase: Some(ReconcilePhase::Ready),
            ..Default::default()
        });
        let mut failed = env("team-a", "prod");
        failed.status = Some(ManagedEnvironmentStatus {
            phase: Some(ReconcilePhase::Error),
            ..Default::default()
        });

        assert_eq!(count_ready(&[ready, failed, env("team-b", "dev")]), 1);
    }

    #[test]
    fn test_resource_list_is_truncated_after_three() {
        let names: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| (*s).to_string()).collect();
        assert_eq!(format_resource_list(&names[..2]), "a, b");
        assert_eq!(format_resource_list(&names), "a, b, c, ... (4 total)");
    }
}
