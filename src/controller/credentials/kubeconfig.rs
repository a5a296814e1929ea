//! Kubeconfig parsing and synthesis
//!
//! Only the fields needed to reach a single cluster are modelled; exec plugins and
//! file-path references are not usable from inside the controller and are ignored.

use super::{ConnectionMaterial, CredentialError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KubeconfigDocument {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub current_context: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: ClusterEntry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub client_certificate_data: Option<String>,
    #[serde(default)]
    pub client_key_data: Option<String>,
}

impl std::fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEntry")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("client_certificate_data", &self.client_certificate_data.is_some())
            .field("client_key_data", &self.client_key_data.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse a kubeconfig blob into connection material
///
/// The current context selects cluster and user; when `current-context` is unset the first
/// context is used. The result must carry a server URL and either a non-empty bearer token
/// or a client certificate with its key.
pub fn parse_connection_material(blob: &str) -> Result<ConnectionMaterial, CredentialError> {
    let document: KubeconfigDocument = serde_yaml::from_str(blob)
        .map_err(|e| CredentialError::Validation(format!("kubeconfig is not valid YAML: {e}")))?;

    let context = match non_empty(document.current_context.as_ref()) {
        Some(current) => document
            .contexts
            .iter()
            .find(|c| c.name == current)
            .ok_or_else(|| {
                CredentialError::Validation(format!(
                    "current-context '{current}' is not defined in the kubeconfig"
                ))
            })?,
        None => document.contexts.first().ok_or_else(|| {
            CredentialError::Validation("kubeconfig defines no contexts".to_string())
        })?,
    };

    let cluster = document
        .clusters
        .iter()
        .find(|c| c.name == context.context.cluster)
        .ok_or_else(|| {
            CredentialError::Validation(format!(
                "cluster '{}' referenced by context '{}' is not defined",
                context.context.cluster, context.name
            ))
        })?;
    let user = document
        .users
        .iter()
        .find(|u| u.name == context.context.user)
        .ok_or_else(|| {
            CredentialError::Validation(format!(
                "user '{}' referenced by context '{}' is not defined",
                context.context.user, context.name
            ))
        })?;

    let server = non_empty(cluster.cluster.server.as_ref()).ok_or_else(|| {
        CredentialError::Validation(format!("cluster '{}' has no server URL", cluster.name))
    })?;

    let material = ConnectionMaterial {
        server,
        bearer_token: non_empty(user.user.token.as_ref()),
        client_certificate_data: non_empty(user.user.client_certificate_data.as_ref()),
        client_key_data: non_empty(user.user.client_key_data.as_ref()),
        certificate_authority_data: non_empty(cluster.cluster.certificate_authority_data.as_ref()),
        insecure: cluster.cluster.insecure_skip_tls_verify.unwrap_or(false),
    };
    material.validate()?;
    Ok(material)
}

/// Build a single-context kubeconfig that the kube client can load
pub fn to_client_kubeconfig(
    material: &ConnectionMaterial,
) -> Result<kube::config::Kubeconfig, serde_json::Error> {
    let mut cluster = serde_json::json!({
        "server": material.server,
        "insecure-skip-tls-verify": material.insecure,
    });
    if let Some(ca) = &material.certificate_authority_data {
        if !material.insecure {
            cluster["certificate-authority-data"] = serde_json::Value::String(ca.clone());
        }
    }

    let mut user = serde_json::Map::new();
    if let Some(token) = &material.bearer_token {
        user.insert("token".to_string(), serde_json::Value::String(token.clone()));
    }
    if let (Some(cert), Some(key)) = (
        &material.client_certificate_data,
        &material.client_key_data,
    ) {
        user.insert(
            "client-certificate-data".to_string(),
            serde_json::Value::String(cert.clone()),
        );
        user.insert(
            "client-key-data".to_string(),
            serde_json::Value::String(key.clone()),
        );
    }

    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "target", "cluster": cluster }],
        "users": [{ "name": "target", "user": user }],
        "contexts": [{ "name": "target", "context": { "cluster": "target", "user": "target" } }],
        "current-context": "target",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: other
  cluster:
    server: https://other.example.com:6443
- name: staging
  cluster:
    server: https://api.staging.example.com:6443
    certificate-authority-data: Y2EtZGF0YQ==
contexts:
- name: other
  context:
    cluster: other
    user: admin
- name: staging
  context:
    cluster: staging
    user: admin
current-context: staging
users:
- name: admin
  user:
    token: sha256~abc
"#;

    #[test]
    fn test_current_context_selects_cluster() {
        let material = parse_connection_material(TOKEN_KUBECONFIG).unwrap();
        assert_eq!(material.server, "https://api.staging.example.com:6443");
        assert_eq!(material.bearer_token.as_deref(), Some("sha256~abc"));
        assert_eq!(material.certificate_authority_data.as_deref(), Some("Y2EtZGF0YQ=="));
        assert!(!material.insecure);
    }

    #[test]
    fn test_first_context_used_without_current_context() {
        let blob = TOKEN_KUBECONFIG.replace("current-context: staging", "");
        let material = parse_connection_material(&blob).unwrap();
        assert_eq!(material.server, "https://other.example.com:6443");
    }

    #[test]
    fn test_client_certificate_is_accepted() {
        let blob = r#"
clusters:
- name: c
  cluster:
    server: https://c.example.com
    insecure-skip-tls-verify: true
contexts:
- name: c
  context: { cluster: c, user: u }
users:
- name: u
  user:
    client-certificate-data: Y2VydA==
    client-key-data: a2V5
"#;
        let material = parse_connection_material(blob).unwrap();
        assert!(material.bearer_token.is_none());
        assert!(material.has_client_certificate());
        assert!(material.insecure);
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let blob = TOKEN_KUBECONFIG.replace("token: sha256~abc", "token: \"\"");
        let err = parse_connection_material(&blob).unwrap_err();
        assert!(matches!(err, CredentialError::Validation(_)));
    }

    #[test]
    fn test_missing_server_is_rejected() {
        let blob = TOKEN_KUBECONFIG.replace(
            "    server: https://api.staging.example.com:6443\n",
            "",
        );
        assert!(matches!(
            parse_connection_material(&blob),
            Err(CredentialError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_current_context_is_rejected() {
        let blob = TOKEN_KUBECONFIG.replace("current-context: staging", "current-context: prod");
        assert!(matches!(
            parse_connection_material(&blob),
            Err(CredentialError::Validation(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            parse_connection_material("{{{ not yaml"),
            Err(CredentialError::Validation(_))
        ));
    }

    #[test]
    fn test_client_kubeconfig_carries_token() {
        let material = parse_connection_material(TOKEN_KUBECONFIG).unwrap();
        let kubeconfig = to_client_kubeconfig(&material).unwrap();

        assert_eq!(kubeconfig.current_context.as_deref(), Some("target"));
        let cluster = kubeconfig.clusters[0].cluster.as_ref().unwrap();
        assert_eq!(
            cluster.server.as_deref(),
            Some("https://api.staging.example.com:6443")
        );
        assert_eq!(
            cluster.certificate_authority_data.as_deref(),
            Some("Y2EtZGF0YQ==")
        );
        let auth = kubeconfig.auth_infos[0].auth_info.as_ref().unwrap();
        assert!(auth.token.is_some());
    }
}
