//! In-memory condition reporter

use super::{apply_update, ConditionReporter, ResourceRef, StatusError, StatusUpdate};
use crate::crd::ManagedEnvironmentStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Debug, Default)]
pub struct InMemoryConditionReporter {
    statuses: Arc<RwLock<HashMap<ResourceRef, ManagedEnvironmentStatus>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryConditionReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last published status of `resource`
    pub async fn status(&self, resource: &ResourceRef) -> Option<ManagedEnvironmentStatus> {
        self.statuses.read().await.get(resource).cloned()
    }

    /// Number of publications that changed a stored status
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConditionReporter for InMemoryConditionReporter {
    async fn publish(
        &self,
        resource: &ResourceRef,
        update: &StatusUpdate,
    ) -> Result<bool, StatusError> {
        let mut statuses = self.statuses.write().await;
        let now = chrono::Utc::now().to_rfc3339();
        let Some(status) = apply_update(statuses.get(resource), update, &now) else {
            return Ok(false);
        };
        statuses.insert(resource.clone(), status);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
