//! # Cluster Registration Synthesizer
//!
//! Renders the Argo CD declarative cluster Secret for a managed environment and writes or
//! removes it through a [`RegistrationStore`].
//!
//! The artifact is a pure function of (internal key, connection material, TLS flag,
//! namespace restriction) and its name is derived from the key alone, so it can always be
//! rebuilt or found again without a secondary index.

mod memory;
mod secret;

pub use memory::InMemoryRegistrationStore;
pub use secret::KubeRegistrationStore;

use crate::constants::{
    ARGOCD_SECRET_TYPE_CLUSTER, ARGOCD_SECRET_TYPE_LABEL, CLUSTER_SECRET_PREFIX,
    MANAGED_ENVIRONMENT_KEY_LABEL, MANAGED_ENVIRONMENT_QUERY_PARAMETER,
};
use crate::controller::credentials::ConnectionMaterial;
use crate::controller::mapping::InternalKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("failed to render cluster registration: {0}")]
    Render(String),
    #[error("cluster registration request failed: {0}")]
    Api(#[from] kube::Error),
}

/// Namespaces the sync engine may deploy to; empty means cluster-wide
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceRestriction {
    pub namespaces: Vec<String>,
    pub cluster_resources: bool,
}

/// TLS section of the Argo CD cluster config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientConfig {
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_data: Option<String>,
}

/// `config` entry of an Argo CD cluster Secret
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    pub tls_client_config: TlsClientConfig,
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .field("insecure", &self.tls_client_config.insecure)
            .finish_non_exhaustive()
    }
}

/// Rendered cluster registration
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterRegistration {
    pub name: String,
    pub namespace: String,
    pub key: InternalKey,
    pub labels: BTreeMap<String, String>,
    /// Secret data entries (`name`, `server`, `config`, optional `namespaces`, `clusterResources`)
    pub data: BTreeMap<String, String>,
}

impl std::fmt::Debug for ClusterRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRegistration")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .field("server", &self.server())
            .finish_non_exhaustive()
    }
}

impl ClusterRegistration {
    /// Render the registration for `key`
    pub fn render(
        key: &InternalKey,
        namespace: &str,
        material: &ConnectionMaterial,
        tls_skip_verify: bool,
        restriction: &NamespaceRestriction,
    ) -> Result<Self, RegistrationError> {
        if material.server.trim().is_empty() {
            return Err(RegistrationError::Render(
                "connection material has no server URL".to_string(),
            ));
        }

        let name = registration_name(key);
        let insecure = tls_skip_verify || material.insecure;
        let config = ClusterConfig {
            bearer_token: material.bearer_token.clone(),
            tls_client_config: TlsClientConfig {
                insecure,
                cert_data: material
                    .bearer_token
                    .is_none()
                    .then(|| material.client_certificate_data.clone())
                    .flatten(),
                key_data: material
                    .bearer_token
                    .is_none()
                    .then(|| material.client_key_data.clone())
                    .flatten(),
                ca_data: if insecure {
                    None
                } else {
                    material.certificate_authority_data.clone()
                },
            },
        };
        let config_json =
            serde_json::to_string(&config).map_err(|e| RegistrationError::Render(e.to_string()))?;

        let mut data = BTreeMap::from([
            ("name".to_string(), name.clone()),
            ("server".to_string(), server_url(&material.server, key)),
            ("config".to_string(), config_json),
        ]);
        if !restriction.namespaces.is_empty() {
            data.insert("namespaces".to_string(), restriction.namespaces.join(","));
            data.insert(
                "clusterResources".to_string(),
                restriction.cluster_resources.to_string(),
            );
        }

        let labels = BTreeMap::from([
            (
                ARGOCD_SECRET_TYPE_LABEL.to_string(),
                ARGOCD_SECRET_TYPE_CLUSTER.to_string(),
            ),
            (MANAGED_ENVIRONMENT_KEY_LABEL.to_string(), key.to_string()),
        ]);

        Ok(Self {
            name,
            namespace: namespace.to_string(),
            key: key.clone(),
            labels,
            data,
        })
    }

    /// Registered server URL
    #[must_use]
    pub fn server(&self) -> Option<&str> {
        self.data.get("server").map(String::as_str)
    }

    /// Parsed `config` entry
    #[must_use]
    pub fn config(&self) -> Option<ClusterConfig> {
        self.data
            .get("config")
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Deterministic name of the registration Secret for `key`
#[must_use]
pub fn registration_name(key: &InternalKey) -> String {
    format!("{CLUSTER_SECRET_PREFIX}{key}")
}

/// API URL tagged with the internal key
///
/// Two managed environments pointing at the same API server must still register as
/// distinct clusters, so the key rides along as a query parameter.
#[must_use]
pub fn server_url(api_url: &str, key: &InternalKey) -> String {
    let separator = if api_url.contains('?') { '&' } else { '?' };
    format!("{api_url}{separator}{MANAGED_ENVIRONMENT_QUERY_PARAMETER}={key}")
}

/// What a write did to the stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Created,
    Updated,
    Unchanged,
}

impl SynthesisOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisOutcome::Created => "created",
            SynthesisOutcome::Updated => "updated",
            SynthesisOutcome::Unchanged => "unchanged",
        }
    }
}

/// Location of a written registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHandle {
    pub name: String,
    pub namespace: String,
    pub outcome: SynthesisOutcome,
}

/// Storage of rendered registrations
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Write `registration`, skipping the write when the stored copy is identical
    async fn apply(
        &self,
        registration: &ClusterRegistration,
    ) -> Result<SynthesisOutcome, RegistrationError>;

    /// Read the registration stored under `name`
    async fn get(&self, name: &str) -> Result<Option<ClusterRegistration>, RegistrationError>;

    /// Delete the registration stored under `name`
    /// Returns true if it existed. Absence is not an error.
    async fn delete(&self, name: &str) -> Result<bool, RegistrationError>;
}

/// Renders and stores cluster registrations
#[derive(Clone)]
pub struct ClusterRegistrationSynthesizer {
    store: Arc<dyn RegistrationStore>,
    namespace: String,
}

impl std::fmt::Debug for ClusterRegistrationSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRegistrationSynthesizer")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ClusterRegistrationSynthesizer {
    pub fn new(store: Arc<dyn RegistrationStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create or refresh the registration for `key`
    ///
    /// Identical inputs leave the stored artifact untouched.
    pub async fn synthesize(
        &self,
        key: &InternalKey,
        material: &ConnectionMaterial,
        tls_skip_verify: bool,
        restriction: &NamespaceRestriction,
    ) -> Result<RegistrationHandle, RegistrationError> {
        let registration =
            ClusterRegistration::render(key, &self.namespace, material, tls_skip_verify, restriction)?;
        let outcome = self.store.apply(&registration).await?;
        if outcome != SynthesisOutcome::Unchanged {
            info!(
                registration.name = registration.name.as_str(),
                registration.namespace = self.namespace.as_str(),
                outcome = outcome.as_str(),
                "registration.synthesized"
            );
        }
        Ok(RegistrationHandle {
            name: registration.name,
            namespace: self.namespace.clone(),
            outcome,
        })
    }

    /// Remove the registration for `key`; absence counts as success
    pub async fn remove(&self, key: &InternalKey) -> Result<bool, RegistrationError> {
        let name = registration_name(key);
        let existed = self.store.delete(&name).await?;
        if existed {
            info!(
                registration.name = name.as_str(),
                registration.namespace = self.namespace.as_str(),
                "registration.removed"
            );
        }
        Ok(existed)
    }

    /// Read back the stored registration for `key`
    pub async fn get(&self, key: &InternalKey) -> Result<Option<ClusterRegistration>, RegistrationError> {
        self.store.get(&registration_name(key)).await
    }
}
