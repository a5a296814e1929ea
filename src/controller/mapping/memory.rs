//! In-memory identity mapping backend
//!
//! Rows live in an arena; a triple index points at the live slot and deleted slots are
//! reused. The write lock makes "check index, then insert" a single atomic step.
//!
//! This is ephemeral - data does not persist across restarts. A restarted controller mints
//! new keys, so cluster registrations written under the old keys are left behind.

use super::{IdentityMappingStore, InternalKey, MappingError, MappingTriple};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct MappingRow {
    triple: MappingTriple,
    key: InternalKey,
}

#[derive(Debug, Default)]
struct Arena {
    /// Deleted rows become `None` until their slot is reused
    rows: Vec<Option<MappingRow>>,
    index: HashMap<MappingTriple, usize>,
    free: Vec<usize>,
}

impl Arena {
    fn get(&self, triple: &MappingTriple) -> Result<Option<InternalKey>, MappingError> {
        let Some(&slot) = self.index.get(triple) else {
            return Ok(None);
        };
        match self.rows.get(slot).and_then(Option::as_ref) {
            Some(row) if row.triple == *triple => Ok(Some(row.key.clone())),
            _ => Err(MappingError::Corrupt {
                name: format!("slot-{slot}"),
                detail: format!("index entry for {triple} points at a missing or foreign row"),
            }),
        }
    }

    fn insert(&mut self, row: MappingRow) {
        let triple = row.triple.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.rows[slot] = Some(row);
                slot
            }
            None => {
                self.rows.push(Some(row));
                self.rows.len() - 1
            }
        };
        self.index.insert(triple, slot);
    }
}

/// Process-local mapping store
#[derive(Clone, Debug, Default)]
pub struct InMemoryMappingStore {
    arena: Arc<RwLock<Arena>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rows
    pub async fn len(&self) -> usize {
        self.arena.read().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl IdentityMappingStore for InMemoryMappingStore {
    async fn get_or_create(&self, triple: &MappingTriple) -> Result<InternalKey, MappingError> {
        if let Some(key) = self.arena.read().await.get(triple)? {
            return Ok(key);
        }

        let mut arena = self.arena.write().await;
        // Another writer may have inserted between the read and write locks
        if let Some(key) = arena.get(triple)? {
            return Ok(key);
        }

        let key = InternalKey::generate();
        arena.insert(MappingRow {
            triple: triple.clone(),
            key: key.clone(),
        });
        debug!(mapping.triple = %triple, mapping.key = %key, "mapping.created");
        Ok(key)
    }

    async fn lookup(&self, triple: &MappingTriple) -> Result<Option<InternalKey>, MappingError> {
        self.arena.read().await.get(triple)
    }

    async fn delete(&self, triple: &MappingTriple) -> Result<bool, MappingError> {
        let mut arena = self.arena.write().await;
        let Some(slot) = arena.index.remove(triple) else {
            return Ok(false);
        };
        if let Some(row) = arena.rows.get_mut(slot) {
            *row = None;
            arena.free.push(slot);
        }
        debug!(mapping.triple = %triple, "mapping.deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(uid: &str) -> MappingTriple {
        MappingTriple::new("GitOpsDeploymentManagedEnvironment", uid, "ManagedEnvironment")
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = InMemoryMappingStore::new();
        let first = store.get_or_create(&triple("a")).await.unwrap();
        let second = store.get_or_create(&triple("a")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_triples_get_distinct_keys() {
        let store = InMemoryMappingStore::new();
        let a = store.get_or_create(&triple("a")).await.unwrap();
        let b = store.get_or_create(&triple("b")).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryMappingStore::new();
        store.get_or_create(&triple("a")).await.unwrap();

        assert!(store.delete(&triple("a")).await.unwrap());
        assert!(!store.delete(&triple("a")).await.unwrap());
        assert!(store.lookup(&triple("a")).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_recreate_after_delete_mints_new_key() {
        let store = InMemoryMappingStore::new();
        let before = store.get_or_create(&triple("a")).await.unwrap();
        store.delete(&triple("a")).await.unwrap();
        let after = store.get_or_create(&triple("a")).await.unwrap();

        assert_ne!(before, after);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_churn_reuses_deleted_slots() {
        let store = InMemoryMappingStore::new();
        let kept = store.get_or_create(&triple("kept")).await.unwrap();

        for round in 0..100 {
            let uid = format!("churn-{round}");
            store.get_or_create(&triple(&uid)).await.unwrap();
            store.delete(&triple(&uid)).await.unwrap();
        }

        assert_eq!(store.arena.read().await.rows.len(), 2);
        assert_eq!(store.lookup(&triple("kept")).await.unwrap(), Some(kept));
        assert_eq!(store.len().await, 1);
    }
}
