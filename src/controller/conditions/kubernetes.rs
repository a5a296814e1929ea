//! Condition reporter patching the status subresource

use super::{apply_update, ConditionReporter, ResourceRef, StatusError, StatusUpdate};
use crate::constants::FIELD_MANAGER;
use crate::crd::ManagedEnvironment;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[derive(Clone)]
pub struct KubeConditionReporter {
    client: Client,
}

impl std::fmt::Debug for KubeConditionReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConditionReporter").finish_non_exhaustive()
    }
}

impl KubeConditionReporter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConditionReporter for KubeConditionReporter {
    async fn publish(
        &self,
        resource: &ResourceRef,
        update: &StatusUpdate,
    ) -> Result<bool, StatusError> {
        let api: Api<ManagedEnvironment> = Api::namespaced(self.client.clone(), &resource.namespace);

        // Read the live object: the cached copy handed to reconcile may predate our own
        // last write.
        let Some(live) = api.get_opt(&resource.name).await? else {
            debug!(resource = %resource, "Skipping status update - resource is gone");
            return Ok(false);
        };
        if live.uid().as_deref() != Some(resource.uid.as_str()) {
            debug!(resource = %resource, "Skipping status update - resource was recreated");
            return Ok(false);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let Some(status) = apply_update(live.status.as_ref(), update, &now) else {
            debug!(
                resource = %resource,
                phase = update.phase.as_str(),
                "Skipping status update - status unchanged"
            );
            return Ok(false);
        };

        let patch = serde_json::json!({ "status": serde_json::to_value(&status)? });
        match api
            .patch_status(
                &resource.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(patch),
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
