//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of the desired resources so
//! each run can record which configuration it applied.

use sha2::{Digest, Sha256};

use crate::planner::canonical::canonical_string;

use super::spec::{Properties, ResourceSpec, normalize_type};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the full desired resource list.
    ///
    /// Declaration order is significant; property order is not.
    #[must_use]
    pub fn hash_resources(&self, resources: &[ResourceSpec]) -> String {
        let mut hasher = Sha256::new();

        for resource in resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize_type(&resource.resource_type).as_bytes());
        hasher.update([0u8]);
        if let Some(provider) = &resource.provider {
            hasher.update(provider.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(Self::canonical_properties(&resource.properties).as_bytes());

        hex::encode(hasher.finalize())
    }

    fn canonical_properties(properties: &Properties) -> String {
        canonical_string(&serde_json::Value::Object(properties.clone()))
    }
}
