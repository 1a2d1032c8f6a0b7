//! Provider client interface.
//!
//! Resource handlers speak to every cloud through this narrow, capability
//! style trait. Payloads and observed values use neutral property names;
//! each client translates them to and from its own wire format.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::Properties;
use crate::error::Result;

/// Kinds of remote objects a provider manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual machine (DigitalOcean droplet, Vultr instance).
    Droplet,
    /// Block storage volume.
    Volume,
    /// DNS zone.
    Domain,
    /// Record inside a DNS zone.
    DnsRecord,
    /// Cloud firewall or firewall group.
    Firewall,
    /// Load balancer.
    LoadBalancer,
}

impl ResourceKind {
    /// Lower-case name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Droplet => "droplet",
            Self::Volume => "volume",
            Self::Domain => "domain",
            Self::DnsRecord => "dns_record",
            Self::Firewall => "firewall",
            Self::LoadBalancer => "load_balancer",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of an existing remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// Object kind.
    pub kind: ResourceKind,
    /// Provider-assigned identifier.
    pub id: String,
    /// Enclosing object, for objects addressed through a parent (a DNS
    /// record's domain).
    pub parent: Option<String>,
}

impl ResourceRef {
    /// Creates a reference without a parent.
    #[must_use]
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            parent: None,
        }
    }

    /// Sets the parent object.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{} {parent}/{}", self.kind, self.id),
            None => write!(f, "{} {}", self.kind, self.id),
        }
    }
}

/// In-place operations beyond plain CRUD.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceAction {
    /// Change a machine's plan.
    Resize {
        /// New size slug.
        size: String,
    },
    /// Grow a volume.
    ResizeVolume {
        /// New size in GiB.
        size_gb: u64,
        /// Region of the volume, where the provider needs it.
        region: Option<String>,
    },
    /// Power a machine off.
    PowerOff,
    /// Power a machine on.
    PowerOn,
    /// Attach the object to a machine (volume attach, firewall or load
    /// balancer membership).
    Attach {
        /// Machine identifier.
        target_id: String,
        /// Region, where the provider needs it.
        region: Option<String>,
    },
    /// Detach the object from a machine.
    Detach {
        /// Machine identifier.
        target_id: String,
        /// Region, where the provider needs it.
        region: Option<String>,
    },
    /// Add tags.
    AddTags(Vec<String>),
    /// Remove tags.
    RemoveTags(Vec<String>),
    /// Enable a provider feature such as backups.
    EnableFeature(String),
    /// Disable a provider feature.
    DisableFeature(String),
    /// Add entries to a rule list property (firewall rules, forwarding
    /// rules).
    AddRules {
        /// Property holding the rule list.
        field: String,
        /// Rules to add.
        rules: Vec<Value>,
    },
    /// Remove entries from a rule list property.
    RemoveRules {
        /// Property holding the rule list.
        field: String,
        /// Rules to remove.
        rules: Vec<Value>,
    },
}

impl ResourceAction {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Resize { .. } => "resize",
            Self::ResizeVolume { .. } => "resize volume",
            Self::PowerOff => "power off",
            Self::PowerOn => "power on",
            Self::Attach { .. } => "attach",
            Self::Detach { .. } => "detach",
            Self::AddTags(_) => "add tags",
            Self::RemoveTags(_) => "remove tags",
            Self::EnableFeature(_) => "enable feature",
            Self::DisableFeature(_) => "disable feature",
            Self::AddRules { .. } => "add rules",
            Self::RemoveRules { .. } => "remove rules",
        }
    }
}

/// A cloud provider API.
///
/// Observed property maps always carry `id` and, where the provider reports
/// them, `status` and `ip_address`.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Canonical provider name.
    fn name(&self) -> &'static str;

    /// Creates an object and returns its observed properties.
    async fn create_resource(&self, kind: ResourceKind, payload: &Properties) -> Result<Properties>;

    /// Reads an object's observed properties.
    async fn read_resource(&self, target: &ResourceRef) -> Result<Properties>;

    /// Updates fields of an object in place.
    async fn update_resource(&self, target: &ResourceRef, changes: &Properties) -> Result<Properties>;

    /// Deletes an object.
    async fn delete_resource(&self, target: &ResourceRef) -> Result<()>;

    /// Runs an in-place action and waits for the provider to finish it.
    async fn perform(&self, target: &ResourceRef, action: &ResourceAction) -> Result<()>;

    /// Resolves an SSH key name, fingerprint or id to the id the create
    /// payload expects. `None` if the account has no such key.
    async fn resolve_ssh_key(&self, key: &str) -> Result<Option<Value>>;
}

/// Reads an identifier out of an observed property map.
#[must_use]
pub fn observed_id(observed: &Properties) -> Option<String> {
    match observed.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Converts an identifier string to JSON, as a number when it is one.
#[must_use]
pub fn id_value(id: &str) -> Value {
    id.parse::<u64>().map_or_else(|_| Value::String(id.to_string()), Value::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observed_id() {
        let mut observed = Properties::new();
        assert!(observed_id(&observed).is_none());

        observed.insert("id".into(), json!(3164494));
        assert_eq!(observed_id(&observed).as_deref(), Some("3164494"));

        observed.insert("id".into(), json!("cb676a46-66fd-4dfb-b839-443f2e6c0b60"));
        assert_eq!(
            observed_id(&observed).as_deref(),
            Some("cb676a46-66fd-4dfb-b839-443f2e6c0b60")
        );
    }

    #[test]
    fn test_id_value() {
        assert_eq!(id_value("42"), json!(42));
        assert_eq!(id_value("vol-1"), json!("vol-1"));
    }

    #[test]
    fn test_resource_ref_display() {
        let record = ResourceRef::new(ResourceKind::DnsRecord, "7").with_parent("example.com");
        assert_eq!(record.to_string(), "dns_record example.com/7");
        assert_eq!(ResourceRef::new(ResourceKind::Droplet, "1").to_string(), "droplet 1");
    }
}
