//! # Identity Mapping Store
//!
//! Links a (resource kind, resource uid, relation kind) triple to a stable internal key.
//!
//! Backends implement an atomic "insert if absent, else return existing" primitive, so
//! concurrent reconcilers of the same resource always observe the same key without any
//! application-level locking.
//!
//! - `memory.rs` - process-local arena/index backend
//! - `configmap.rs` - one ConfigMap per row in the controller namespace

mod configmap;
mod memory;

pub use configmap::ConfigMapMappingStore;
pub use memory::InMemoryMappingStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Key identifying one mapping row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTriple {
    pub resource_kind: String,
    pub resource_uid: String,
    pub relation_kind: String,
}

impl MappingTriple {
    pub fn new(
        resource_kind: impl Into<String>,
        resource_uid: impl Into<String>,
        relation_kind: impl Into<String>,
    ) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            resource_uid: resource_uid.into(),
            relation_kind: relation_kind.into(),
        }
    }

    /// Stable hex digest of the triple, used to derive storage names
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.resource_kind.as_bytes());
        hasher.update([0]);
        hasher.update(self.resource_uid.as_bytes());
        hasher.update([0]);
        hasher.update(self.relation_kind.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Display for MappingTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.resource_kind, self.resource_uid, self.relation_kind
        )
    }
}

/// Stable internal key assigned to a mapping row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InternalKey(String);

impl InternalKey {
    /// Mint a fresh random key
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for InternalKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InternalKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum MappingError {
    /// Creation kept racing with another writer past the retry budget
    #[error("mapping for {triple} still conflicting after {attempts} attempts")]
    Conflict { triple: MappingTriple, attempts: u32 },
    /// A stored row does not describe the triple it was found under
    #[error("mapping row {name} is corrupt: {detail}")]
    Corrupt { name: String, detail: String },
    #[error("mapping store request failed: {0}")]
    Api(#[from] kube::Error),
}

/// Persistent get-or-create table of internal keys
#[async_trait]
pub trait IdentityMappingStore: Send + Sync {
    /// Return the key for `triple`, creating the row if none exists
    ///
    /// Exactly one row is ever created per triple; concurrent callers get the same key.
    async fn get_or_create(&self, triple: &MappingTriple) -> Result<InternalKey, MappingError>;

    /// Return the key for `triple` without creating a row
    async fn lookup(&self, triple: &MappingTriple) -> Result<Option<InternalKey>, MappingError>;

    /// Remove the row for `triple`
    /// Returns true if a row existed. Absence is not an error.
    async fn delete(&self, triple: &MappingTriple) -> Result<bool, MappingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_and_field_separated() {
        let a = MappingTriple::new("Kind", "uid", "Rel");
        let b = MappingTriple::new("Kind", "uid", "Rel");
        let shifted = MappingTriple::new("Kin", "duid", "Rel");

        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        assert_ne!(a.digest(), shifted.digest());
    }

    #[test]
    fn test_generated_keys_are_unique() {
        assert_ne!(InternalKey::generate(), InternalKey::generate());
    }
}
