//! # Credential Resolver
//!
//! Turns a managed environment's credential Secret into connection material for the target
//! cluster. Either the kubeconfig's own credential is used as-is, or a dedicated service
//! account is provisioned on the target cluster and its minted token is used instead.
//!
//! - `kubeconfig.rs` - kubeconfig parsing and client kubeconfig synthesis
//! - `remote.rs` - target cluster operations behind a trait
//! - `provision.rs` - provisioned identity naming and creation
//! - `poll.rs` - bounded, cancellable token wait

pub mod kubeconfig;
pub mod poll;
pub mod provision;
pub mod remote;

pub use poll::{wait_for_token, TokenPollSettings};
pub use provision::{full_access_rules, provision_identity, ProvisionedIdentity};
pub use remote::{
    KubeRemoteCluster, KubeRemoteClusterConnector, RemoteCluster, RemoteClusterConnector,
    RemoteClusterError,
};

use crate::constants::{BEARER_TOKEN_DATA_KEY, CREDENTIAL_SECRET_TYPE, KUBECONFIG_DATA_KEY};
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum CredentialError {
    /// Secret missing, unparsable or lacking a usable credential
    #[error("invalid credentials: {0}")]
    Validation(String),
    /// The provisioned service account never received a token
    #[error("no token appeared in {token_secret} within {waited:?}")]
    Timeout {
        token_secret: String,
        waited: Duration,
    },
    /// The wait was abandoned because the resource is being deleted
    #[error("credential resolution cancelled")]
    Cancelled,
    #[error(transparent)]
    Remote(#[from] RemoteClusterError),
}

/// Everything needed to open a connection to the target cluster
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ConnectionMaterial {
    /// API server URL
    pub server: String,
    /// Bearer token
    pub bearer_token: Option<String>,
    /// Base64 PEM client certificate
    pub client_certificate_data: Option<String>,
    /// Base64 PEM client key
    pub client_key_data: Option<String>,
    /// Base64 PEM CA bundle
    pub certificate_authority_data: Option<String>,
    /// Skip server certificate verification
    pub insecure: bool,
}

impl std::fmt::Debug for ConnectionMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMaterial")
            .field("server", &self.server)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .field("client_certificate", &self.client_certificate_data.is_some())
            .field("client_key_data", &self.client_key_data.as_ref().map(|_| "***"))
            .field("certificate_authority", &self.certificate_authority_data.is_some())
            .field("insecure", &self.insecure)
            .finish()
    }
}

impl ConnectionMaterial {
    /// Material authenticating with a bearer token only
    #[must_use]
    pub fn with_token(server: &str, token: &str) -> Self {
        Self {
            server: server.to_string(),
            bearer_token: Some(token.to_string()),
            client_certificate_data: None,
            client_key_data: None,
            certificate_authority_data: None,
            insecure: false,
        }
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.bearer_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    #[must_use]
    pub fn has_client_certificate(&self) -> bool {
        self.client_certificate_data
            .as_deref()
            .is_some_and(|c| !c.is_empty())
            && self.client_key_data.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Require a server URL and a usable credential
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.server.trim().is_empty() {
            return Err(CredentialError::Validation(
                "connection material has no server URL".to_string(),
            ));
        }
        url::Url::parse(&self.server).map_err(|e| {
            CredentialError::Validation(format!("server URL '{}' is invalid: {e}", self.server))
        })?;
        if !self.has_token() && !self.has_client_certificate() {
            return Err(CredentialError::Validation(
                "credential has neither a token nor a client certificate".to_string(),
            ));
        }
        Ok(())
    }
}

/// Contents of a managed environment credential Secret
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct CredentialSecret {
    /// Kubeconfig document
    pub kubeconfig: String,
    /// Explicit bearer token overriding the kubeconfig user's credential
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSecret")
            .field("kubeconfig_len", &self.kubeconfig.len())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl CredentialSecret {
    /// Read a Secret of the managed environment type
    pub fn from_secret(secret: &Secret) -> Result<Self, CredentialError> {
        let name = secret.metadata.name.as_deref().unwrap_or("unknown");
        if secret.type_.as_deref() != Some(CREDENTIAL_SECRET_TYPE) {
            return Err(CredentialError::Validation(format!(
                "secret '{name}' has type '{}', expected '{CREDENTIAL_SECRET_TYPE}'",
                secret.type_.as_deref().unwrap_or("")
            )));
        }

        let read_key = |key: &str| -> Result<Option<String>, CredentialError> {
            let from_data = secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|bytes| {
                    String::from_utf8(bytes.0.clone()).map_err(|e| {
                        CredentialError::Validation(format!(
                            "secret '{name}' key '{key}' is not UTF-8: {e}"
                        ))
                    })
                })
                .transpose()?;
            Ok(from_data.or_else(|| {
                secret
                    .string_data
                    .as_ref()
                    .and_then(|data| data.get(key))
                    .cloned()
            }))
        };

        let kubeconfig = read_key(KUBECONFIG_DATA_KEY)?
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                CredentialError::Validation(format!(
                    "secret '{name}' has no '{KUBECONFIG_DATA_KEY}' key"
                ))
            })?;
        let bearer_token = read_key(BEARER_TOKEN_DATA_KEY)?;

        Ok(Self {
            kubeconfig,
            bearer_token,
        })
    }

    /// Connection material as declared by the Secret
    pub fn connection_material(&self) -> Result<ConnectionMaterial, CredentialError> {
        let mut material = match &self.bearer_token {
            // An explicit token replaces whatever the kubeconfig user carries
            Some(token) => {
                let mut material = kubeconfig::parse_connection_material(&self.kubeconfig)
                    .or_else(|_| parse_server_only(&self.kubeconfig))?;
                material.bearer_token = Some(token.trim().to_string());
                material.client_certificate_data = None;
                material.client_key_data = None;
                material
            }
            None => kubeconfig::parse_connection_material(&self.kubeconfig)?,
        };
        if material.bearer_token.as_deref().is_some_and(str::is_empty) {
            material.bearer_token = None;
        }
        material.validate()?;
        Ok(material)
    }
}

/// Kubeconfig without a user credential, used when the token comes from elsewhere
fn parse_server_only(blob: &str) -> Result<ConnectionMaterial, CredentialError> {
    let document: kubeconfig::KubeconfigDocument = serde_yaml::from_str(blob)
        .map_err(|e| CredentialError::Validation(format!("kubeconfig is not valid YAML: {e}")))?;
    let cluster_name = document
        .current_context
        .as_ref()
        .and_then(|current| document.contexts.iter().find(|c| &c.name == current))
        .or_else(|| document.contexts.first())
        .map(|c| c.context.cluster.clone());
    let cluster = document
        .clusters
        .iter()
        .find(|c| Some(&c.name) == cluster_name.as_ref())
        .or_else(|| document.clusters.first())
        .ok_or_else(|| CredentialError::Validation("kubeconfig defines no clusters".to_string()))?;

    Ok(ConnectionMaterial {
        server: cluster.cluster.server.clone().unwrap_or_default(),
        bearer_token: None,
        client_certificate_data: None,
        client_key_data: None,
        certificate_authority_data: cluster.cluster.certificate_authority_data.clone(),
        insecure: cluster.cluster.insecure_skip_tls_verify.unwrap_or(false),
    })
}

/// Inputs of one resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub secret: &'a CredentialSecret,
    /// Provision a dedicated service account instead of using the Secret's credential
    pub provision_new: bool,
    /// Declared API server URL; authoritative over the kubeconfig's server
    pub api_url: &'a str,
    /// Skip server certificate verification
    pub allow_insecure: bool,
    /// Suffix naming the provisioned objects (the resource uid)
    pub identity_suffix: &'a str,
}

/// Resolves connection material, provisioning a service account when asked to
#[derive(Clone)]
pub struct CredentialResolver {
    connector: Arc<dyn RemoteClusterConnector>,
    service_account_namespace: String,
    poll: TokenPollSettings,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("service_account_namespace", &self.service_account_namespace)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    pub fn new(
        connector: Arc<dyn RemoteClusterConnector>,
        service_account_namespace: &str,
        poll: TokenPollSettings,
    ) -> Self {
        Self {
            connector,
            service_account_namespace: service_account_namespace.to_string(),
            poll,
        }
    }

    #[must_use]
    pub fn connector(&self) -> &Arc<dyn RemoteClusterConnector> {
        &self.connector
    }

    /// Produce connection material for the target cluster
    ///
    /// With `provision_new` the returned material's server is exactly `api_url` and its
    /// token is the one minted for the provisioned service account.
    pub async fn resolve(
        &self,
        request: ResolveRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionMaterial, CredentialError> {
        let mut declared = request.secret.connection_material()?;
        if !request.api_url.trim().is_empty() {
            declared.server = request.api_url.to_string();
        }
        declared.insecure = declared.insecure || request.allow_insecure;
        declared.validate()?;

        if !request.provision_new {
            debug!(remote.server = declared.server.as_str(), "credentials.from_secret");
            return Ok(declared);
        }

        let remote = self.connector.connect(&declared).await?;
        let identity =
            ProvisionedIdentity::for_resource(request.identity_suffix, &self.service_account_namespace);
        provision_identity(remote.as_ref(), &identity).await?;

        let token = wait_for_token(remote.as_ref(), &identity, &self.poll, cancel).await?;
        info!(
            identity.service_account = identity.service_account.as_str(),
            "credentials.token_minted"
        );

        Ok(ConnectionMaterial {
            server: request.api_url.to_string(),
            bearer_token: Some(token),
            client_certificate_data: None,
            client_key_data: None,
            certificate_authority_data: declared.certificate_authority_data.clone(),
            insecure: declared.insecure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    const KUBECONFIG: &str = r#"
clusters:
- name: c
  cluster:
    server: https://c.example.com:6443
contexts:
- name: c
  context: { cluster: c, user: u }
current-context: c
users:
- name: u
  user:
    token: abc
"#;

    fn secret(type_: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("creds".to_string()),
                ..Default::default()
            },
            type_: Some(type_.to_string()),
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_secret_of_wrong_type_is_rejected() {
        let err = CredentialSecret::from_secret(&secret("Opaque", &[("kubeconfig", KUBECONFIG)]))
            .unwrap_err();
        assert!(matches!(err, CredentialError::Validation(_)));
    }

    #[test]
    fn test_secret_without_kubeconfig_is_rejected() {
        let err = CredentialSecret::from_secret(&secret(CREDENTIAL_SECRET_TYPE, &[])).unwrap_err();
        assert!(matches!(err, CredentialError::Validation(_)));
    }

    #[test]
    fn test_secret_is_read() {
        let creds =
            CredentialSecret::from_secret(&secret(CREDENTIAL_SECRET_TYPE, &[("kubeconfig", KUBECONFIG)]))
                .unwrap();
        let material = creds.connection_material().unwrap();
        assert_eq!(material.server, "https://c.example.com:6443");
        assert_eq!(material.bearer_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_explicit_token_overrides_kubeconfig_user() {
        let creds = CredentialSecret::from_secret(&secret(
            CREDENTIAL_SECRET_TYPE,
            &[("kubeconfig", KUBECONFIG), ("token", "override")],
        ))
        .unwrap();
        let material = creds.connection_material().unwrap();
        assert_eq!(material.bearer_token.as_deref(), Some("override"));
    }

    #[test]
    fn test_empty_explicit_token_is_rejected() {
        let creds = CredentialSecret::from_secret(&secret(
            CREDENTIAL_SECRET_TYPE,
            &[("kubeconfig", KUBECONFIG), ("token", "")],
        ))
        .unwrap();
        assert!(matches!(
            creds.connection_material(),
            Err(CredentialError::Validation(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let material = ConnectionMaterial::with_token("https://x", "super-secret");
        let rendered = format!("{material:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_invalid_server_url_is_rejected() {
        let material = ConnectionMaterial::with_token("not a url", "t");
        assert!(matches!(material.validate(), Err(CredentialError::Validation(_))));
    }
}
