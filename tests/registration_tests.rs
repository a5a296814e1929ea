//! # Cluster Registration Tests
//!
//! Shape of the Argo CD cluster Secret written for a managed environment.

mod common;

use common::*;
use managed_environment_controller::constants::{
    ARGOCD_SECRET_TYPE_CLUSTER, ARGOCD_SECRET_TYPE_LABEL, MANAGED_ENVIRONMENT_KEY_LABEL,
};
use managed_environment_controller::controller::reconciler::mapping_triple;
use managed_environment_controller::prelude::IdentityMappingStore;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_namespace_restriction_is_registered() {
    let harness = Harness::new(ClusterScript::default());
    let mut spec = spec(false);
    spec.namespaces = vec!["payments".to_string(), "ledger".to_string()];
    spec.cluster_resources = true;
    let env = managed_environment("scoped", "uid-scoped", spec);

    let report = harness
        .reconciler
        .reconcile(&env, Some(&admin_secret()), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_ready(), "unexpected outcome: {:?}", report.outcome);

    let key = harness
        .mapping
        .lookup(&mapping_triple(&resource_ref(&env)))
        .await
        .unwrap()
        .unwrap();
    let registration = harness.reconciler.synthesizer().get(&key).await.unwrap().unwrap();

    assert_eq!(
        registration.data.get("namespaces").map(String::as_str),
        Some("payments,ledger")
    );
    assert_eq!(
        registration.data.get("clusterResources").map(String::as_str),
        Some("true")
    );
    assert_eq!(
        registration.labels.get(ARGOCD_SECRET_TYPE_LABEL).map(String::as_str),
        Some(ARGOCD_SECRET_TYPE_CLUSTER)
    );
    assert_eq!(
        registration.labels.get(MANAGED_ENVIRONMENT_KEY_LABEL).map(String::as_str),
        Some(key.as_str())
    );
}

#[tokio::test]
async fn test_environments_on_same_server_get_distinct_registrations() {
    let harness = Harness::new(ClusterScript::default());
    let secret = admin_secret();
    let cancel = CancellationToken::new();

    let first = managed_environment("first", "uid-first", spec(false));
    let second = managed_environment("second", "uid-second", spec(false));
    for env in [&first, &second] {
        assert!(harness
            .reconciler
            .reconcile(env, Some(&secret), &cancel)
            .await
            .unwrap()
            .is_ready());
    }

    let names = harness.registrations.names().await;
    assert_eq!(names.len(), 2);

    let mut servers = Vec::new();
    for env in [&first, &second] {
        let key = harness
            .mapping
            .lookup(&mapping_triple(&resource_ref(env)))
            .await
            .unwrap()
            .unwrap();
        let registration = harness.reconciler.synthesizer().get(&key).await.unwrap().unwrap();
        servers.push(registration.server().unwrap().to_string());
    }
    assert_ne!(servers[0], servers[1]);
    assert!(servers.iter().all(|s| s.starts_with(API_URL)));
}

#[tokio::test]
async fn test_insecure_flag_is_carried_to_registration() {
    let harness = Harness::new(ClusterScript::default());
    let mut spec = spec(false);
    spec.allow_insecure_skip_tls_verify = true;
    let env = managed_environment("insecure", "uid-insecure", spec);

    assert!(harness
        .reconciler
        .reconcile(&env, Some(&admin_secret()), &CancellationToken::new())
        .await
        .unwrap()
        .is_ready());

    let key = harness
        .mapping
        .lookup(&mapping_triple(&resource_ref(&env)))
        .await
        .unwrap()
        .unwrap();
    let config = harness
        .reconciler
        .synthesizer()
        .get(&key)
        .await
        .unwrap()
        .unwrap()
        .config()
        .unwrap();
    assert!(config.tls_client_config.insecure);
    assert!(config.tls_client_config.ca_data.is_none());
}
