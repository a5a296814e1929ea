//! Service account provisioning on the target cluster
//!
//! Every object is named from the managed environment's uid, so provisioning the same
//! resource again converges on the same objects.

use super::remote::{RemoteCluster, RemoteClusterError};
use crate::constants::{
    CLUSTER_ROLE_BINDING_PREFIX, CLUSTER_ROLE_PREFIX, SERVICE_ACCOUNT_PREFIX,
    SERVICE_ACCOUNT_TOKEN_PREFIX,
};
use crate::observability;
use k8s_openapi::api::rbac::v1::PolicyRule;
use tracing::info;

/// Names of the objects making up a provisioned identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedIdentity {
    pub namespace: String,
    pub service_account: String,
    pub cluster_role: String,
    pub cluster_role_binding: String,
    pub token_secret: String,
}

impl ProvisionedIdentity {
    #[must_use]
    pub fn for_resource(resource_uid: &str, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            service_account: format!("{SERVICE_ACCOUNT_PREFIX}{resource_uid}"),
            cluster_role: format!("{CLUSTER_ROLE_PREFIX}{resource_uid}"),
            cluster_role_binding: format!("{CLUSTER_ROLE_BINDING_PREFIX}{resource_uid}"),
            token_secret: format!("{SERVICE_ACCOUNT_TOKEN_PREFIX}{resource_uid}"),
        }
    }
}

/// Rules granting every verb on every resource in every group
#[must_use]
pub fn full_access_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            api_groups: Some(vec!["*".to_string()]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        },
        PolicyRule {
            non_resource_urls: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        },
    ]
}

/// Create or refresh the service account, its cluster role and binding, and the token Secret
pub async fn provision_identity(
    remote: &dyn RemoteCluster,
    identity: &ProvisionedIdentity,
) -> Result<(), RemoteClusterError> {
    remote.ensure_service_account(identity).await?;
    remote
        .ensure_cluster_role(identity, &full_access_rules())
        .await?;
    remote.ensure_cluster_role_binding(identity).await?;
    remote.ensure_token_secret(identity).await?;

    info!(
        identity.namespace = identity.namespace.as_str(),
        identity.service_account = identity.service_account.as_str(),
        "identity.provisioned"
    );
    observability::metrics::increment_identities_provisioned();
    Ok(())
}
