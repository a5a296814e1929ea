//! # Credential Resolution Tests
//!
//! Token polling and credential resolution against a scripted target cluster.

mod common;

use common::*;
use managed_environment_controller::controller::credentials::{
    wait_for_token, CredentialError, CredentialResolver, CredentialSecret, ProvisionedIdentity,
    ResolveRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn identity() -> ProvisionedIdentity {
    ProvisionedIdentity::for_resource("uid-poll", "kube-system")
}

fn resolver(cluster: &Arc<FakeCluster>) -> CredentialResolver {
    CredentialResolver::new(
        Arc::new(FakeConnector {
            cluster: cluster.clone(),
        }),
        "kube-system",
        poll_settings(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_poll_returns_token_once_minted() {
    let cluster = FakeCluster::new(ClusterScript {
        token_after_reads: Some(4),
        ..Default::default()
    });

    let token = wait_for_token(
        cluster.as_ref(),
        &identity(),
        &poll_settings(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(token, MINTED_TOKEN);
    assert_eq!(cluster.token_reads(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_poll_gives_up_at_deadline() {
    let cluster = FakeCluster::new(ClusterScript {
        token_after_reads: None,
        ..Default::default()
    });
    let settings = poll_settings();

    let started = tokio::time::Instant::now();
    let err = wait_for_token(
        cluster.as_ref(),
        &identity(),
        &settings,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CredentialError::Timeout { .. }));
    let waited = started.elapsed();
    assert!(waited >= settings.timeout);
    assert!(waited < settings.timeout + settings.max_interval);
}

#[tokio::test(start_paused = true)]
async fn test_poll_stops_when_cancelled() {
    let cluster = FakeCluster::new(ClusterScript {
        token_after_reads: None,
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = wait_for_token(cluster.as_ref(), &identity(), &poll_settings(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, CredentialError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_resolve_without_provisioning_uses_declared_api_url() {
    let cluster = FakeCluster::new(ClusterScript::default());
    let secret = CredentialSecret::from_secret(&admin_secret()).unwrap();

    let material = resolver(&cluster)
        .resolve(
            ResolveRequest {
                secret: &secret,
                provision_new: false,
                api_url: API_URL,
                allow_insecure: true,
                identity_suffix: "uid-declared",
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(material.server, API_URL);
    assert_eq!(material.bearer_token.as_deref(), Some(ADMIN_TOKEN));
    assert!(material.insecure);
    // Nothing is provisioned without the flag
    assert!(cluster.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resolve_with_provisioning_returns_minted_token() {
    let cluster = FakeCluster::new(ClusterScript {
        token_after_reads: Some(2),
        ..Default::default()
    });
    let secret = CredentialSecret::from_secret(&admin_secret()).unwrap();

    let material = resolver(&cluster)
        .resolve(
            ResolveRequest {
                secret: &secret,
                provision_new: true,
                api_url: API_URL,
                allow_insecure: false,
                identity_suffix: "uid-minted",
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(material.server, API_URL);
    assert_eq!(material.bearer_token.as_deref(), Some(MINTED_TOKEN));
    assert!(material.client_certificate_data.is_none());
    assert_eq!(
        cluster.calls(),
        vec![
            "service_account:argocd-manager-uid-minted".to_string(),
            "cluster_role:argocd-manager-cluster-role-uid-minted".to_string(),
            "cluster_role_binding:argocd-manager-cluster-role-binding-uid-minted".to_string(),
            "token_secret:argocd-manager-token-uid-minted".to_string(),
        ]
    );
}
