//! # Remote Cluster Access
//!
//! The controller only touches a target cluster through [`RemoteCluster`], so reconciliation
//! can be exercised without a live API server. [`KubeRemoteClusterConnector`] is the
//! production implementation backed by a kube client built from the resolved material.

use super::kubeconfig::to_client_kubeconfig;
use super::provision::ProvisionedIdentity;
use super::ConnectionMaterial;
use crate::constants::{FIELD_MANAGER, SERVICE_ACCOUNT_NAME_ANNOTATION, SERVICE_ACCOUNT_TOKEN_SECRET_TYPE};
use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RemoteClusterError {
    /// The API server rejected the credential (HTTP 401)
    #[error("target cluster rejected the credential: {0}")]
    Unauthorized(String),
    /// The credential is valid but lacks a required right (HTTP 403 or a denied review)
    #[error("credential lacks required rights: {0}")]
    Forbidden(String),
    /// Transport or TLS failure reaching the API server
    #[error("target cluster is unreachable: {0}")]
    Unreachable(String),
    /// Any other API error
    #[error("target cluster request failed with {code}: {message}")]
    Api { code: u16, message: String },
    /// Connection material could not be turned into a client
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl From<kube::Error> for RemoteClusterError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(api_err) if api_err.code == 401 => {
                RemoteClusterError::Unauthorized(api_err.message)
            }
            kube::Error::Api(api_err) if api_err.code == 403 => {
                RemoteClusterError::Forbidden(api_err.message)
            }
            kube::Error::Api(api_err) => RemoteClusterError::Api {
                code: api_err.code,
                message: api_err.message,
            },
            other => RemoteClusterError::Unreachable(other.to_string()),
        }
    }
}

/// Operations performed against a target cluster
#[async_trait]
pub trait RemoteCluster: Send + Sync {
    /// Create or update the service account of `identity`
    async fn ensure_service_account(&self, identity: &ProvisionedIdentity)
        -> Result<(), RemoteClusterError>;

    /// Create or update the cluster role of `identity` with `rules`
    async fn ensure_cluster_role(
        &self,
        identity: &ProvisionedIdentity,
        rules: &[PolicyRule],
    ) -> Result<(), RemoteClusterError>;

    /// Bind the cluster role of `identity` to its service account
    async fn ensure_cluster_role_binding(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<(), RemoteClusterError>;

    /// Create the token Secret the platform fills in for the service account
    async fn ensure_token_secret(&self, identity: &ProvisionedIdentity)
        -> Result<(), RemoteClusterError>;

    /// Read the minted token; `None` until the platform has populated it
    async fn read_token(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<Option<String>, RemoteClusterError>;

    /// Check the connected identity may do everything, cluster-wide or in each namespace
    async fn verify_access(&self, namespaces: &[String]) -> Result<(), RemoteClusterError>;
}

/// Opens [`RemoteCluster`] handles from connection material
#[async_trait]
pub trait RemoteClusterConnector: Send + Sync {
    async fn connect(
        &self,
        material: &ConnectionMaterial,
    ) -> Result<Arc<dyn RemoteCluster>, RemoteClusterError>;
}

/// Connector building kube clients
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeRemoteClusterConnector;

#[async_trait]
impl RemoteClusterConnector for KubeRemoteClusterConnector {
    async fn connect(
        &self,
        material: &ConnectionMaterial,
    ) -> Result<Arc<dyn RemoteCluster>, RemoteClusterError> {
        let kubeconfig = to_client_kubeconfig(material)
            .map_err(|e| RemoteClusterError::InvalidConfig(e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| RemoteClusterError::InvalidConfig(e.to_string()))?;
        let client = Client::try_from(config)
            .map_err(|e| RemoteClusterError::InvalidConfig(e.to_string()))?;

        debug!(remote.server = material.server.as_str(), "remote.client_created");
        Ok(Arc::new(KubeRemoteCluster { client }))
    }
}

/// [`RemoteCluster`] over a kube client
#[derive(Clone)]
pub struct KubeRemoteCluster {
    client: Client,
}

impl std::fmt::Debug for KubeRemoteCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRemoteCluster").finish_non_exhaustive()
    }
}

impl KubeRemoteCluster {
    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }

    fn metadata(name: &str, namespace: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                FIELD_MANAGER.to_string(),
            )])),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RemoteCluster for KubeRemoteCluster {
    async fn ensure_service_account(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<(), RemoteClusterError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &identity.namespace);
        let account = ServiceAccount {
            metadata: Self::metadata(&identity.service_account, Some(&identity.namespace)),
            ..Default::default()
        };
        api.patch(
            &identity.service_account,
            &Self::apply_params(),
            &Patch::Apply(&account),
        )
        .await?;
        Ok(())
    }

    async fn ensure_cluster_role(
        &self,
        identity: &ProvisionedIdentity,
        rules: &[PolicyRule],
    ) -> Result<(), RemoteClusterError> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        let role = ClusterRole {
            metadata: Self::metadata(&identity.cluster_role, None),
            rules: Some(rules.to_vec()),
            ..Default::default()
        };
        api.patch(&identity.cluster_role, &Self::apply_params(), &Patch::Apply(&role))
            .await?;
        Ok(())
    }

    async fn ensure_cluster_role_binding(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<(), RemoteClusterError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let binding = ClusterRoleBinding {
            metadata: Self::metadata(&identity.cluster_role_binding, None),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: identity.cluster_role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: identity.service_account.clone(),
                namespace: Some(identity.namespace.clone()),
                ..Default::default()
            }]),
        };
        api.patch(
            &identity.cluster_role_binding,
            &Self::apply_params(),
            &Patch::Apply(&binding),
        )
        .await?;
        Ok(())
    }

    async fn ensure_token_secret(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<(), RemoteClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &identity.namespace);
        let mut metadata = Self::metadata(&identity.token_secret, Some(&identity.namespace));
        metadata.annotations = Some(BTreeMap::from([(
            SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
            identity.service_account.clone(),
        )]));
        let secret = Secret {
            metadata,
            type_: Some(SERVICE_ACCOUNT_TOKEN_SECRET_TYPE.to_string()),
            ..Default::default()
        };
        api.patch(&identity.token_secret, &Self::apply_params(), &Patch::Apply(&secret))
            .await?;
        Ok(())
    }

    async fn read_token(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<Option<String>, RemoteClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &identity.namespace);
        let Some(secret) = api.get_opt(&identity.token_secret).await? else {
            return Ok(None);
        };
        let token = secret
            .data
            .as_ref()
            .and_then(|data| data.get("token"))
            .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
            .filter(|token| !token.trim().is_empty());
        Ok(token)
    }

    async fn verify_access(&self, namespaces: &[String]) -> Result<(), RemoteClusterError> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let scopes: Vec<Option<String>> = if namespaces.is_empty() {
            vec![None]
        } else {
            namespaces.iter().cloned().map(Some).collect()
        };

        for namespace in scopes {
            let review = SelfSubjectAccessReview {
                spec: SelfSubjectAccessReviewSpec {
                    resource_attributes: Some(ResourceAttributes {
                        verb: Some("*".to_string()),
                        group: Some("*".to_string()),
                        resource: Some("*".to_string()),
                        namespace: namespace.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            };
            let result = api.create(&PostParams::default(), &review).await?;
            let allowed = result.status.as_ref().is_some_and(|s| s.allowed);
            if !allowed {
                let reason = result
                    .status
                    .and_then(|s| s.reason)
                    .unwrap_or_else(|| "access review denied".to_string());
                return Err(RemoteClusterError::Forbidden(format!(
                    "{} ({})",
                    reason,
                    namespace.as_deref().unwrap_or("cluster-wide")
                )));
            }
        }
        Ok(())
    }
}
