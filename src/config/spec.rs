//! Configuration specification types.
//!
//! This module defines the structs that map to `infrastructure.yml` (the
//! desired resources) and `settings.yml` (credentials, state backend and
//! polling behaviour).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Ordered property bag of a resource.
pub type Properties = serde_json::Map<String, Value>;

/// Provider used when neither the resource nor the settings name one.
pub const DEFAULT_PROVIDER: &str = "digitalocean";

/// Canonical form of a resource type tag: trimmed and lowercased.
#[must_use]
pub fn normalize_type(tag: &str) -> String {
    tag.trim().to_lowercase()
}

fn deserialize_type<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    String::deserialize(deserializer).map(|tag| normalize_type(&tag))
}

/// The root of `infrastructure.yml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InfraConfig {
    /// Desired resources in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// A single desired resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Resource name, unique within its type.
    pub name: String,
    /// Resource type tag, normalized on load.
    #[serde(rename = "type", deserialize_with = "deserialize_type")]
    pub resource_type: String,
    /// Provider managing the resource; falls back to the settings' provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Desired properties.
    #[serde(default)]
    pub properties: Properties,
}

impl ResourceSpec {
    /// Creates a resource spec without a provider override.
    #[must_use]
    pub fn new(name: &str, resource_type: &str, properties: Properties) -> Self {
        Self {
            name: name.to_string(),
            resource_type: normalize_type(resource_type),
            provider: None,
            properties,
        }
    }

    /// Sets the provider override.
    #[must_use]
    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    /// Returns true if this spec has the given `(name, type)` key.
    #[must_use]
    pub fn matches(&self, name: &str, resource_type: &str) -> bool {
        self.name == name && normalize_type(&self.resource_type) == normalize_type(resource_type)
    }

    /// Returns a property by key.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Returns a string property by key.
    #[must_use]
    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// The root of `settings.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSettings {
    /// Default provider for resources that do not name one.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// DigitalOcean credentials.
    #[serde(default)]
    pub do_credentials: Option<DigitalOceanCredentials>,
    /// Vultr credentials.
    #[serde(default)]
    pub vultr_credentials: Option<VultrCredentials>,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Polling behaviour for asynchronous provider operations.
    #[serde(default)]
    pub poll: PollSettings,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            do_credentials: None,
            vultr_credentials: None,
            state: StateConfig::default(),
            poll: PollSettings::default(),
        }
    }
}

/// DigitalOcean API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DigitalOceanCredentials {
    /// Personal access token.
    #[serde(default)]
    pub token: String,
    /// Alternative API base URL.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// Vultr API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VultrCredentials {
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// Alternative API base URL.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state file path (for local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Polling behaviour for provider-side asynchronous operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSettings {
    /// Seconds between two status checks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Seconds before a wait is abandoned.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

const fn default_interval_secs() -> u64 {
    5
}

const fn default_timeout_secs() -> u64 {
    300
}
