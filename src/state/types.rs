//! State types for tracking provisioned resources.
//!
//! These types represent the recorded state of the infrastructure, used for
//! planning and idempotent operations. Records are kept in insertion order;
//! destroy walks them in reverse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::config::{Properties, ResourceSpec, normalize_type};
use crate::error::StateError;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of retained history entries.
pub const MAX_HISTORY: usize = 100;

/// The complete recorded state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct State {
    /// State format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// When the state was last updated.
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Provisioned resources in insertion order.
    pub resources: Vec<ResourceRecord>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// A provisioned resource as recorded after a successful operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Resource name.
    pub name: String,
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Provider that manages the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Desired properties merged with provider-assigned values.
    #[serde(default)]
    pub properties: Properties,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: RunOperation,
    /// Configuration hash at time of the run.
    pub config_hash: String,
    /// Resources touched by the run.
    pub resources: Vec<String>,
    /// Whether every resource succeeded.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Deploy run.
    Deploy,
    /// Destroy run.
    Destroy,
}

fn default_version() -> String {
    STATE_VERSION.to_string()
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Creates a new empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: default_version(),
            config_hash: String::new(),
            last_updated: Utc::now(),
            resources: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Checks the `(name, type)` uniqueness invariant.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::DuplicateKey`] for the first repeated key.
    pub fn validate(&self) -> Result<(), StateError> {
        let mut seen = HashSet::new();
        for record in &self.resources {
            if !seen.insert((record.name.as_str(), normalize_type(&record.resource_type))) {
                return Err(StateError::DuplicateKey {
                    resource_type: record.resource_type.clone(),
                    name: record.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Finds a record by `(name, type)`.
    #[must_use]
    pub fn find(&self, name: &str, resource_type: &str) -> Option<&ResourceRecord> {
        self.resources
            .iter()
            .find(|r| r.matches(name, resource_type))
    }

    /// Inserts or replaces a record, preserving the position of an existing
    /// record with the same key. Returns true if a record was replaced.
    pub fn upsert(&mut self, record: ResourceRecord) -> bool {
        let replaced = if let Some(existing) = self
            .resources
            .iter_mut()
            .find(|r| r.matches(&record.name, &record.resource_type))
        {
            *existing = record;
            true
        } else {
            self.resources.push(record);
            false
        };
        self.last_updated = Utc::now();
        replaced
    }

    /// Removes a record by `(name, type)`.
    pub fn remove(&mut self, name: &str, resource_type: &str) -> Option<ResourceRecord> {
        let position = self
            .resources
            .iter()
            .position(|r| r.matches(name, resource_type))?;
        self.last_updated = Utc::now();
        Some(self.resources.remove(position))
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns the number of records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceRecord {
    /// Creates a record from a desired resource, overlaid with observed
    /// provider values.
    #[must_use]
    pub fn from_spec(spec: &ResourceSpec, provider: &str, observed: Properties) -> Self {
        let mut record = Self {
            name: spec.name.clone(),
            resource_type: spec.resource_type.clone(),
            provider: Some(provider.to_string()),
            properties: spec.properties.clone(),
        };
        record.merge_observed(observed);
        record
    }

    /// Returns true if this record has the given `(name, type)` key.
    #[must_use]
    pub fn matches(&self, name: &str, resource_type: &str) -> bool {
        self.name == name && normalize_type(&self.resource_type) == normalize_type(resource_type)
    }

    /// Returns a property by key.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Returns a property rendered as an identifier string. Numbers are
    /// accepted since some providers assign numeric ids.
    #[must_use]
    pub fn id_property(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Merges observed values into the properties. A null value removes the
    /// key.
    pub fn merge_observed(&mut self, observed: Properties) {
        for (key, value) in observed {
            if value.is_null() {
                self.properties.shift_remove(&key);
            } else {
                self.properties.insert(key, value);
            }
        }
    }
}

impl RunHistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Marks the entry as failed.
    #[must_use]
    pub fn failed(mut self, error: &str) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Deploy => "deploy",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
