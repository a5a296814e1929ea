//! # Identity Mapping Tests
//!
//! Concurrency behaviour of the in-memory identity mapping store.

use futures::future::join_all;
use managed_environment_controller::controller::mapping::{
    IdentityMappingStore, InMemoryMappingStore, MappingTriple,
};
use std::collections::HashSet;
use std::sync::Arc;

fn triple(uid: &str) -> MappingTriple {
    MappingTriple::new("GitOpsDeploymentManagedEnvironment", uid, "ManagedEnvironment")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_or_create_yields_one_row() {
    let store = Arc::new(InMemoryMappingStore::new());

    let handles = (0..16).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.get_or_create(&triple("uid-1")).await.unwrap() })
    });
    let keys: HashSet<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(keys.len(), 1);
    assert_eq!(store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_triples_get_distinct_keys() {
    let store = Arc::new(InMemoryMappingStore::new());

    let handles = (0..8).map(|i| {
        let store = store.clone();
        tokio::spawn(async move { store.get_or_create(&triple(&format!("uid-{i}"))).await.unwrap() })
    });
    let keys: HashSet<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(keys.len(), 8);
    assert_eq!(store.len().await, 8);
}

#[tokio::test]
async fn test_lookup_does_not_create() {
    let store = InMemoryMappingStore::new();
    assert_eq!(store.lookup(&triple("uid-2")).await.unwrap(), None);
    assert!(store.is_empty().await);

    let key = store.get_or_create(&triple("uid-2")).await.unwrap();
    assert_eq!(store.lookup(&triple("uid-2")).await.unwrap(), Some(key));
}
