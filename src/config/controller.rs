//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_ARGOCD_NAMESPACE, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS,
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_METRICS_PORT, DEFAULT_RESYNC_INTERVAL_SECS,
    DEFAULT_SERVICE_ACCOUNT_NAMESPACE, DEFAULT_TOKEN_POLL_MAX_INTERVAL_MS,
    DEFAULT_TOKEN_POLL_MIN_INTERVAL_MS, DEFAULT_TOKEN_POLL_TIMEOUT_SECS,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Backend holding identity mapping rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingBackend {
    /// One ConfigMap per row in the controller namespace (persistent)
    ConfigMap,
    /// Process-local arena; rows are lost on restart
    Memory,
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the controller runs in; identity mapping rows are stored here
    pub controller_namespace: String,
    /// Namespace of the Argo CD instance that consumes cluster registrations
    pub argocd_namespace: String,
    /// Namespace on the target cluster where provisioned service accounts live
    pub service_account_namespace: String,
    /// Hard ceiling on waiting for a minted service account token (seconds)
    pub token_poll_timeout_secs: u64,
    /// Shortest gap between token polls (milliseconds)
    pub token_poll_min_interval_ms: u64,
    /// Longest gap between token polls (milliseconds)
    pub token_poll_max_interval_ms: u64,
    /// First retry delay after a failed reconciliation (seconds)
    pub backoff_min_secs: u64,
    /// Retry delay ceiling after repeated failures (seconds)
    pub backoff_max_secs: u64,
    /// Requeue interval after a successful reconciliation (seconds)
    pub resync_interval_secs: u64,
    /// Delay before restarting the watch stream after it ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Log output format
    pub log_format: LogFormat,
    /// Identity mapping backend
    pub mapping_backend: MappingBackend,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            argocd_namespace: DEFAULT_ARGOCD_NAMESPACE.to_string(),
            service_account_namespace: DEFAULT_SERVICE_ACCOUNT_NAMESPACE.to_string(),
            token_poll_timeout_secs: DEFAULT_TOKEN_POLL_TIMEOUT_SECS,
            token_poll_min_interval_ms: DEFAULT_TOKEN_POLL_MIN_INTERVAL_MS,
            token_poll_max_interval_ms: DEFAULT_TOKEN_POLL_MAX_INTERVAL_MS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::Json,
            mapping_backend: MappingBackend::ConfigMap,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let log_format = match lookup("LOG_FORMAT").map(|v| v.to_lowercase()).as_deref() {
            Some("text") => LogFormat::Text,
            _ => LogFormat::Json,
        };
        let mapping_backend = match lookup("MAPPING_BACKEND").map(|v| v.to_lowercase()).as_deref() {
            Some("memory") => MappingBackend::Memory,
            _ => MappingBackend::ConfigMap,
        };

        Self {
            controller_namespace: lookup("POD_NAMESPACE").unwrap_or(defaults.controller_namespace),
            argocd_namespace: lookup("ARGOCD_NAMESPACE").unwrap_or(defaults.argocd_namespace),
            service_account_namespace: lookup("SERVICE_ACCOUNT_NAMESPACE")
                .unwrap_or(defaults.service_account_namespace),
            token_poll_timeout_secs: parsed(
                "TOKEN_POLL_TIMEOUT_SECS",
                defaults.token_poll_timeout_secs,
            ),
            token_poll_min_interval_ms: parsed(
                "TOKEN_POLL_MIN_INTERVAL_MS",
                defaults.token_poll_min_interval_ms,
            ),
            token_poll_max_interval_ms: parsed(
                "TOKEN_POLL_MAX_INTERVAL_MS",
                defaults.token_poll_max_interval_ms,
            ),
            backoff_min_secs: parsed("BACKOFF_MIN_SECS", defaults.backoff_min_secs),
            backoff_max_secs: parsed("BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            resync_interval_secs: parsed("RESYNC_INTERVAL_SECS", defaults.resync_interval_secs),
            watch_restart_delay_secs: parsed(
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            metrics_port: lookup("METRICS_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.metrics_port),
            log_format,
            mapping_backend,
        }
    }

    /// Hard ceiling on the token poll
    pub fn token_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.token_poll_timeout_secs)
    }

    /// Requeue delay after a successful reconciliation
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Delay before restarting the watch stream
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}
