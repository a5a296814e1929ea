//! In-memory registration store
//!
//! This is ephemeral - data does not persist across restarts.

use super::{ClusterRegistration, RegistrationError, RegistrationStore, SynthesisOutcome};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistrationStore {
    registrations: Arc<RwLock<BTreeMap<String, ClusterRegistration>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that changed the stored state
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn names(&self) -> Vec<String> {
        self.registrations.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn apply(
        &self,
        registration: &ClusterRegistration,
    ) -> Result<SynthesisOutcome, RegistrationError> {
        let mut registrations = self.registrations.write().await;
        let outcome = match registrations.get(&registration.name) {
            Some(existing) if existing == registration => return Ok(SynthesisOutcome::Unchanged),
            Some(_) => SynthesisOutcome::Updated,
            None => SynthesisOutcome::Created,
        };
        registrations.insert(registration.name.clone(), registration.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn get(&self, name: &str) -> Result<Option<ClusterRegistration>, RegistrationError> {
        Ok(self.registrations.read().await.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool, RegistrationError> {
        let removed = self.registrations.write().await.remove(name).is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}
