//! Common test utilities
//!
//! A scripted target cluster, fixtures for managed environments and their credential
//! Secrets, and a reconciler wired to in-memory stores.

#![allow(dead_code, reason = "Each test binary uses a different subset of the helpers")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use managed_environment_controller::constants::CREDENTIAL_SECRET_TYPE;
use managed_environment_controller::controller::conditions::{
    InMemoryConditionReporter, ResourceRef,
};
use managed_environment_controller::controller::credentials::{
    ConnectionMaterial, CredentialResolver, ProvisionedIdentity, RemoteCluster,
    RemoteClusterConnector, RemoteClusterError, TokenPollSettings,
};
use managed_environment_controller::controller::mapping::InMemoryMappingStore;
use managed_environment_controller::controller::reconciler::ManagedEnvironmentReconciler;
use managed_environment_controller::controller::registration::{
    ClusterRegistrationSynthesizer, InMemoryRegistrationStore,
};
use managed_environment_controller::crd::{ManagedEnvironment, ManagedEnvironmentSpec};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "team-a";
pub const SECRET_NAME: &str = "staging-kubeconfig";
pub const API_URL: &str = "https://api.staging.example.com:6443";
pub const KUBECONFIG_SERVER: &str = "https://10.0.0.12:6443";
pub const ADMIN_TOKEN: &str = "admin-token";
pub const ARGOCD_NAMESPACE: &str = "gitops-service-argocd";
pub const MINTED_TOKEN: &str = "minted-service-account-token";

/// How the fake target cluster answers
#[derive(Debug, Clone)]
pub struct ClusterScript {
    /// Token appears on this read of the token Secret; `None` never mints one
    pub token_after_reads: Option<u32>,
    /// Access reviews are denied
    pub read_only: bool,
    /// Connections fail at the transport level
    pub unreachable: bool,
}

impl Default for ClusterScript {
    fn default() -> Self {
        Self {
            token_after_reads: Some(1),
            read_only: false,
            unreachable: false,
        }
    }
}

/// Target cluster double recording every call it receives
#[derive(Debug, Default)]
pub struct FakeCluster {
    script: Mutex<ClusterScript>,
    calls: Mutex<Vec<String>>,
    connected_tokens: Mutex<Vec<Option<String>>>,
    token_reads: AtomicU32,
}

impl FakeCluster {
    pub fn new(script: ClusterScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    pub fn set_script(&self, script: ClusterScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Bearer tokens of every connection opened, in order
    pub fn connected_tokens(&self) -> Vec<Option<String>> {
        self.connected_tokens.lock().unwrap().clone()
    }

    pub fn token_reads(&self) -> u32 {
        self.token_reads.load(Ordering::SeqCst)
    }

    fn script(&self) -> ClusterScript {
        self.script.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl RemoteCluster for FakeCluster {
    async fn ensure_service_account(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<(), RemoteClusterError> {
        self.record(format!("service_account:{}", identity.service_account));
        Ok(())
    }

    async fn ensure_cluster_role(
        &self,
        identity: &ProvisionedIdentity,
        _rules: &[PolicyRule],
    ) -> Result<(), RemoteClusterError> {
        self.record(format!("cluster_role:{}", identity.cluster_role));
        Ok(())
    }

    async fn ensure_cluster_role_binding(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<(), RemoteClusterError> {
        self.record(format!(
            "cluster_role_binding:{}",
            identity.cluster_role_binding
        ));
        Ok(())
    }

    async fn ensure_token_secret(
        &self,
        identity: &ProvisionedIdentity,
    ) -> Result<(), RemoteClusterError> {
        self.record(format!("token_secret:{}", identity.token_secret));
        Ok(())
    }

    async fn read_token(
        &self,
        _identity: &ProvisionedIdentity,
    ) -> Result<Option<String>, RemoteClusterError> {
        let reads = self.token_reads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(match self.script().token_after_reads {
            Some(after) if reads >= after => Some(MINTED_TOKEN.to_string()),
            _ => None,
        })
    }

    async fn verify_access(&self, _namespaces: &[String]) -> Result<(), RemoteClusterError> {
        self.record("verify_access");
        if self.script().read_only {
            return Err(RemoteClusterError::Forbidden(
                "access review denied verb '*' on resource '*'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connector handing out the shared [`FakeCluster`]
#[derive(Debug, Clone)]
pub struct FakeConnector {
    pub cluster: Arc<FakeCluster>,
}

#[async_trait]
impl RemoteClusterConnector for FakeConnector {
    async fn connect(
        &self,
        material: &ConnectionMaterial,
    ) -> Result<Arc<dyn RemoteCluster>, RemoteClusterError> {
        self.cluster
            .connected_tokens
            .lock()
            .unwrap()
            .push(material.bearer_token.clone());
        if self.cluster.script().unreachable {
            return Err(RemoteClusterError::Unreachable(format!(
                "dial tcp {}: connection refused",
                material.server
            )));
        }
        let cluster: Arc<dyn RemoteCluster> = self.cluster.clone();
        Ok(cluster)
    }
}

pub fn poll_settings() -> TokenPollSettings {
    TokenPollSettings {
        timeout: Duration::from_secs(60),
        min_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(5),
    }
}

/// Reconciler wired to in-memory stores and a scripted target cluster
pub struct Harness {
    pub reconciler: ManagedEnvironmentReconciler,
    pub mapping: Arc<InMemoryMappingStore>,
    pub registrations: Arc<InMemoryRegistrationStore>,
    pub reporter: Arc<InMemoryConditionReporter>,
    pub cluster: Arc<FakeCluster>,
}

impl Harness {
    pub fn new(script: ClusterScript) -> Self {
        let cluster = FakeCluster::new(script);
        let mapping = Arc::new(InMemoryMappingStore::new());
        let registrations = Arc::new(InMemoryRegistrationStore::new());
        let reporter = Arc::new(InMemoryConditionReporter::new());

        let resolver = CredentialResolver::new(
            Arc::new(FakeConnector {
                cluster: cluster.clone(),
            }),
            "kube-system",
            poll_settings(),
        );
        let synthesizer =
            ClusterRegistrationSynthesizer::new(registrations.clone(), ARGOCD_NAMESPACE);
        let reconciler = ManagedEnvironmentReconciler::new(
            mapping.clone(),
            resolver,
            synthesizer,
            reporter.clone(),
        );

        Self {
            reconciler,
            mapping,
            registrations,
            reporter,
            cluster,
        }
    }
}

pub fn spec(create_new_service_account: bool) -> ManagedEnvironmentSpec {
    ManagedEnvironmentSpec {
        api_url: API_URL.to_string(),
        credentials_secret: SECRET_NAME.to_string(),
        allow_insecure_skip_tls_verify: false,
        create_new_service_account,
        namespaces: Vec::new(),
        cluster_resources: false,
    }
}

/// A persisted managed environment (namespace, uid and generation set)
pub fn managed_environment(
    name: &str,
    uid: &str,
    spec: ManagedEnvironmentSpec,
) -> ManagedEnvironment {
    let mut env = ManagedEnvironment::new(name, spec);
    env.metadata.namespace = Some(NAMESPACE.to_string());
    env.metadata.uid = Some(uid.to_string());
    env.metadata.generation = Some(1);
    env
}

pub fn resource_ref(env: &ManagedEnvironment) -> ResourceRef {
    ResourceRef::from_resource(env).expect("fixture has namespace and uid")
}

pub fn kubeconfig(server: &str, token: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- name: target
  cluster:
    server: {server}
contexts:
- name: target
  context:
    cluster: target
    user: admin
current-context: target
users:
- name: admin
  user:
    token: "{token}"
"#
    )
}

pub fn admin_secret() -> Secret {
    credential_secret(&kubeconfig(KUBECONFIG_SERVER, ADMIN_TOKEN))
}

pub fn credential_secret(kubeconfig: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(SECRET_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        type_: Some(CREDENTIAL_SECRET_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            "kubeconfig".to_string(),
            ByteString(kubeconfig.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}
