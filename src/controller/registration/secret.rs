//! Registration store backed by Argo CD cluster Secrets

use super::{ClusterRegistration, RegistrationError, RegistrationStore, SynthesisOutcome};
use crate::constants::{FIELD_MANAGER, MANAGED_ENVIRONMENT_KEY_LABEL};
use crate::controller::mapping::InternalKey;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct KubeRegistrationStore {
    api: Api<Secret>,
    namespace: String,
}

impl std::fmt::Debug for KubeRegistrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRegistrationStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeRegistrationStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    fn to_secret(registration: &ClusterRegistration) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(registration.name.clone()),
                namespace: Some(registration.namespace.clone()),
                labels: Some(registration.labels.clone()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(
                registration
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn from_secret(secret: &Secret) -> Option<ClusterRegistration> {
        let labels = secret.metadata.labels.clone().unwrap_or_default();
        let key = labels.get(MANAGED_ENVIRONMENT_KEY_LABEL)?.clone();
        let data: BTreeMap<String, String> = secret
            .data
            .as_ref()?
            .iter()
            .filter_map(|(k, v)| String::from_utf8(v.0.clone()).ok().map(|v| (k.clone(), v)))
            .collect();
        Some(ClusterRegistration {
            name: secret.metadata.name.clone()?,
            namespace: secret.metadata.namespace.clone()?,
            key: InternalKey::from(key),
            labels,
            data,
        })
    }

    /// Whether the stored Secret already carries everything `registration` would write
    fn matches(existing: &Secret, registration: &ClusterRegistration) -> bool {
        let labels_match = existing.metadata.labels.as_ref().is_some_and(|labels| {
            registration
                .labels
                .iter()
                .all(|(k, v)| labels.get(k) == Some(v))
        });
        let data_match = existing.data.as_ref().is_some_and(|data| {
            data.len() == registration.data.len()
                && registration
                    .data
                    .iter()
                    .all(|(k, v)| data.get(k).is_some_and(|b| b.0 == v.as_bytes()))
        });
        labels_match && data_match
    }
}

#[async_trait]
impl RegistrationStore for KubeRegistrationStore {
    async fn apply(
        &self,
        registration: &ClusterRegistration,
    ) -> Result<SynthesisOutcome, RegistrationError> {
        let existing = self.api.get_opt(&registration.name).await?;
        let outcome = match &existing {
            Some(secret) if Self::matches(secret, registration) => {
                debug!(
                    registration.name = registration.name.as_str(),
                    "Skipping registration write - stored copy is identical"
                );
                return Ok(SynthesisOutcome::Unchanged);
            }
            Some(_) => SynthesisOutcome::Updated,
            None => SynthesisOutcome::Created,
        };

        let secret = Self::to_secret(registration);
        self.api
            .patch(
                &registration.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await?;
        Ok(outcome)
    }

    async fn get(&self, name: &str) -> Result<Option<ClusterRegistration>, RegistrationError> {
        Ok(self
            .api
            .get_opt(name)
            .await?
            .as_ref()
            .and_then(Self::from_secret))
    }

    async fn delete(&self, name: &str) -> Result<bool, RegistrationError> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::credentials::ConnectionMaterial;
    use crate::controller::registration::NamespaceRestriction;

    fn registration() -> ClusterRegistration {
        ClusterRegistration::render(
            &InternalKey::from("k1"),
            "argocd",
            &ConnectionMaterial::with_token("https://api.example.com", "tok"),
            false,
            &NamespaceRestriction::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_secret_round_trips() {
        let registration = registration();
        let secret = KubeRegistrationStore::to_secret(&registration);

        assert!(KubeRegistrationStore::matches(&secret, &registration));
        assert_eq!(
            KubeRegistrationStore::from_secret(&secret).unwrap(),
            registration
        );
    }

    #[test]
    fn test_changed_data_does_not_match() {
        let registration = registration();
        let mut secret = KubeRegistrationStore::to_secret(&registration);
        if let Some(data) = secret.data.as_mut() {
            data.insert("server".to_string(), ByteString(b"https://elsewhere".to_vec()));
        }
        assert!(!KubeRegistrationStore::matches(&secret, &registration));
    }
}
