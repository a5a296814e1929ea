//! ConfigMap identity mapping backend
//!
//! Each row is a ConfigMap in the controller namespace named after a digest of its triple.
//! The API server's create-if-absent semantics provide the uniqueness constraint: a losing
//! writer gets HTTP 409 and re-reads the winner's row.

use super::{IdentityMappingStore, InternalKey, MappingError, MappingTriple};
use crate::constants::{MAPPING_CONFIGMAP_PREFIX, MAPPING_CONFLICT_RETRIES, MAPPING_LABEL};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const KEY_FIELD: &str = "key";
const RESOURCE_KIND_FIELD: &str = "resourceKind";
const RESOURCE_UID_FIELD: &str = "resourceUID";
const RELATION_KIND_FIELD: &str = "relationKind";

/// Length of the digest prefix used in row names
const DIGEST_PREFIX_LEN: usize = 40;

/// Mapping store persisted as ConfigMaps
#[derive(Clone)]
pub struct ConfigMapMappingStore {
    api: Api<ConfigMap>,
    namespace: String,
}

impl std::fmt::Debug for ConfigMapMappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigMapMappingStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ConfigMapMappingStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    /// Deterministic row name for a triple
    #[must_use]
    pub fn row_name(triple: &MappingTriple) -> String {
        let digest = triple.digest();
        format!(
            "{MAPPING_CONFIGMAP_PREFIX}{}",
            &digest[..DIGEST_PREFIX_LEN.min(digest.len())]
        )
    }

    fn build_row(name: &str, triple: &MappingTriple, key: &InternalKey) -> ConfigMap {
        let data = BTreeMap::from([
            (KEY_FIELD.to_string(), key.to_string()),
            (RESOURCE_KIND_FIELD.to_string(), triple.resource_kind.clone()),
            (RESOURCE_UID_FIELD.to_string(), triple.resource_uid.clone()),
            (RELATION_KIND_FIELD.to_string(), triple.relation_kind.clone()),
        ]);
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    MAPPING_LABEL.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    /// Extract the key from a stored row, checking it belongs to `triple`
    fn read_row(name: &str, row: &ConfigMap, triple: &MappingTriple) -> Result<InternalKey, MappingError> {
        let corrupt = |detail: &str| MappingError::Corrupt {
            name: name.to_string(),
            detail: detail.to_string(),
        };
        let data = row.data.as_ref().ok_or_else(|| corrupt("row has no data"))?;
        let field = |field: &str| data.get(field).map(String::as_str).unwrap_or_default();

        if field(RESOURCE_KIND_FIELD) != triple.resource_kind
            || field(RESOURCE_UID_FIELD) != triple.resource_uid
            || field(RELATION_KIND_FIELD) != triple.relation_kind
        {
            return Err(corrupt("row belongs to a different triple"));
        }
        let key = field(KEY_FIELD);
        if key.is_empty() {
            return Err(corrupt("row has an empty key"));
        }
        Ok(InternalKey::from(key))
    }
}

#[async_trait]
impl IdentityMappingStore for ConfigMapMappingStore {
    async fn get_or_create(&self, triple: &MappingTriple) -> Result<InternalKey, MappingError> {
        let name = Self::row_name(triple);

        for attempt in 1..=MAPPING_CONFLICT_RETRIES {
            if let Some(existing) = self.api.get_opt(&name).await? {
                return Self::read_row(&name, &existing, triple);
            }

            let key = InternalKey::generate();
            let row = Self::build_row(&name, triple, &key);
            match self.api.create(&PostParams::default(), &row).await {
                Ok(_) => {
                    debug!(
                        mapping.triple = %triple,
                        mapping.key = %key,
                        mapping.row = name.as_str(),
                        "mapping.created"
                    );
                    return Ok(key);
                }
                Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                    // Lost the race; the next iteration reads the winner's row
                    debug!(
                        mapping.triple = %triple,
                        attempt,
                        "mapping.create_conflict"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            mapping.triple = %triple,
            attempts = MAPPING_CONFLICT_RETRIES,
            "mapping.conflict_retries_exhausted"
        );
        Err(MappingError::Conflict {
            triple: triple.clone(),
            attempts: MAPPING_CONFLICT_RETRIES,
        })
    }

    async fn lookup(&self, triple: &MappingTriple) -> Result<Option<InternalKey>, MappingError> {
        let name = Self::row_name(triple);
        match self.api.get_opt(&name).await? {
            Some(row) => Self::read_row(&name, &row, triple).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, triple: &MappingTriple) -> Result<bool, MappingError> {
        let name = Self::row_name(triple);
        match self.api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(mapping.triple = %triple, mapping.row = name.as_str(), "mapping.deleted");
                Ok(true)
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
