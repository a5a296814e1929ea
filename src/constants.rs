//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Kind recorded in identity mapping rows for managed environments
pub const MANAGED_ENVIRONMENT_KIND: &str = "GitOpsDeploymentManagedEnvironment";

/// Relation recorded in identity mapping rows for managed environments
pub const MANAGED_ENVIRONMENT_RELATION: &str = "ManagedEnvironment";

/// Finalizer placed on every managed environment so cleanup always runs
pub const MANAGED_ENVIRONMENT_FINALIZER: &str =
    "managed-gitops.redhat.com/managed-environment-cleanup";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "managed-environment-controller";

/// Secret type marking a managed environment credential secret
pub const CREDENTIAL_SECRET_TYPE: &str = "managed-gitops.redhat.com/managed-environment";

/// Data key holding the kubeconfig inside a credential secret
pub const KUBECONFIG_DATA_KEY: &str = "kubeconfig";

/// Optional data key holding an explicit bearer token inside a credential secret
pub const BEARER_TOKEN_DATA_KEY: &str = "token";

/// Condition type published on managed environments
pub const CONDITION_ERROR_OCCURRED: &str = "ErrorOccurred";

/// Fixed message for credential and permission failures
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Unable to reconcile the ManagedEnvironment. Verify that the ManagedEnvironment and Secret are correctly defined, and have valid credentials";

/// Message published when the provisioned service account never received a token
pub const TOKEN_TIMEOUT_MESSAGE: &str =
    "Timed out waiting for a service account token on the target cluster";

/// Message published when the target cluster could not be reached
pub const CLUSTER_UNREACHABLE_MESSAGE: &str =
    "Unable to connect to the API server of the ManagedEnvironment";

/// Message published for unexpected internal failures
pub const INTERNAL_ERROR_MESSAGE: &str =
    "An internal error occurred while reconciling the ManagedEnvironment";

// Argo CD cluster registration

/// Label Argo CD uses to discover declarative cluster secrets
pub const ARGOCD_SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";

/// Value of [`ARGOCD_SECRET_TYPE_LABEL`] for cluster secrets
pub const ARGOCD_SECRET_TYPE_CLUSTER: &str = "cluster";

/// Label carrying the internal key on a cluster registration secret
pub const MANAGED_ENVIRONMENT_KEY_LABEL: &str = "managed-gitops.redhat.com/managed-environment-id";

/// Prefix of cluster registration secret names
pub const CLUSTER_SECRET_PREFIX: &str = "managed-env-";

/// Query parameter appended to the registered server URL
pub const MANAGED_ENVIRONMENT_QUERY_PARAMETER: &str = "managedEnvironment";

/// Default namespace of the sync engine (Argo CD) instance
pub const DEFAULT_ARGOCD_NAMESPACE: &str = "gitops-service-argocd";

// Provisioned identity on the target cluster

/// Prefix for the provisioned service account and its token secret
pub const SERVICE_ACCOUNT_PREFIX: &str = "argocd-manager-";

/// Prefix for the provisioned service account token secret
pub const SERVICE_ACCOUNT_TOKEN_PREFIX: &str = "argocd-manager-token-";

/// Prefix for the provisioned cluster role
pub const CLUSTER_ROLE_PREFIX: &str = "argocd-manager-cluster-role-";

/// Prefix for the provisioned cluster role binding
pub const CLUSTER_ROLE_BINDING_PREFIX: &str = "argocd-manager-cluster-role-binding-";

/// Namespace the provisioned service account is created in
pub const DEFAULT_SERVICE_ACCOUNT_NAMESPACE: &str = "kube-system";

/// Annotation binding a token secret to its service account
pub const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Secret type the platform populates with a service account token
pub const SERVICE_ACCOUNT_TOKEN_SECRET_TYPE: &str = "kubernetes.io/service-account-token";

// Identity mapping store

/// Prefix of ConfigMaps holding identity mapping rows
pub const MAPPING_CONFIGMAP_PREFIX: &str = "mapping-";

/// Label selecting identity mapping ConfigMaps
pub const MAPPING_LABEL: &str = "managed-gitops.redhat.com/identity-mapping";

/// Attempts made by get-or-create before reporting a persistent conflict
pub const MAPPING_CONFLICT_RETRIES: u32 = 5;

/// Default namespace of the controller (mapping rows live here)
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "gitops-service";

// Timing

/// Hard ceiling on waiting for a minted service account token (seconds)
pub const DEFAULT_TOKEN_POLL_TIMEOUT_SECS: u64 = 60;

/// Shortest gap between token polls (milliseconds)
pub const DEFAULT_TOKEN_POLL_MIN_INTERVAL_MS: u64 = 500;

/// Longest gap between token polls (milliseconds)
pub const DEFAULT_TOKEN_POLL_MAX_INTERVAL_MS: u64 = 5_000;

/// First retry delay after a failed reconciliation (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Retry delay ceiling after repeated failures (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Requeue interval after a successful reconciliation (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Default delay before restarting the watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Time allowed for the metrics and probe server to bind (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Polling interval while waiting for the server to bind (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Initial backoff after a throttled watch stream (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1_000;

/// Backoff ceiling for a throttled watch stream (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;
