//! # GitOpsDeploymentManagedEnvironment Spec
//!
//! Declarative description of a remote cluster and how to authenticate to it.

use serde::{Deserialize, Serialize};

/// GitOpsDeploymentManagedEnvironment Custom Resource Definition
///
/// Registers a remote cluster with the sync engine. The referenced Secret must live in the
/// same namespace and carry a kubeconfig under the `kubeconfig` key.
///
/// # Example
///
/// ```yaml
/// apiVersion: managed-gitops.redhat.com/v1alpha1
/// kind: GitOpsDeploymentManagedEnvironment
/// metadata:
///   name: staging-cluster
///   namespace: team-a
/// spec:
///   apiURL: https://api.staging.example.com:6443
///   credentialsSecret: staging-cluster-kubeconfig
///   createNewServiceAccount: true
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "GitOpsDeploymentManagedEnvironment",
    group = "managed-gitops.redhat.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ManagedEnvironmentStatus",
    shortname = "gitopsdeplmenv",
    printcolumn = r#"{"name":"API URL", "type":"string", "jsonPath":".spec.apiURL"}, {"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Error", "type":"string", "jsonPath":".status.conditions[?(@.type==\"ErrorOccurred\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedEnvironmentSpec {
    /// URL of the target cluster's API server
    #[serde(rename = "apiURL")]
    pub api_url: String,
    /// Name of a Secret in the same namespace holding the kubeconfig for the target cluster
    pub credentials_secret: String,
    /// Skip TLS verification of the target API server
    #[serde(default = "default_false", rename = "allowInsecureSkipTLSVerify")]
    pub allow_insecure_skip_tls_verify: bool,
    /// Provision a dedicated service account on the target cluster and register with its
    /// token instead of the credentials from the kubeconfig
    #[serde(default = "default_false")]
    pub create_new_service_account: bool,
    /// Restrict the sync engine to these namespaces on the target cluster
    /// Empty means the whole cluster is managed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    /// Allow cluster-scoped resources to be managed when `namespaces` is set
    #[serde(default = "default_false")]
    pub cluster_resources: bool,
}

/// Shorter name for the managed environment resource
pub type ManagedEnvironment = GitOpsDeploymentManagedEnvironment;

/// Default value for boolean false
pub fn default_false() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::CustomResourceExt;

    #[test]
    fn test_spec_uses_wire_field_names() {
        let spec: ManagedEnvironmentSpec = serde_json::from_value(serde_json::json!({
            "apiURL": "https://api.example.com:6443",
            "credentialsSecret": "cluster-creds",
            "allowInsecureSkipTLSVerify": true,
        }))
        .unwrap();

        assert_eq!(spec.api_url, "https://api.example.com:6443");
        assert_eq!(spec.credentials_secret, "cluster-creds");
        assert!(spec.allow_insecure_skip_tls_verify);
        assert!(!spec.create_new_service_account);
        assert!(spec.namespaces.is_empty());

        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("apiURL").is_some());
        assert!(value.get("namespaces").is_none());
    }

    #[test]
    fn test_crd_identity() {
        let crd = ManagedEnvironment::crd();
        assert_eq!(crd.spec.group, "managed-gitops.redhat.com");
        assert_eq!(crd.spec.names.kind, "GitOpsDeploymentManagedEnvironment");
        assert_eq!(
            crd.spec.names.short_names,
            Some(vec!["gitopsdeplmenv".to_string()])
        );
    }
}
