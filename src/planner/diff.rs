//! Diff engine for comparing desired resources against recorded state.
//!
//! Resource-type rules from the handler run first; every other desired
//! property is compared generically. Provider-computed keys (identifiers,
//! addresses, status, timestamps) never produce a diff.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::trace;

use crate::config::ResourceSpec;
use crate::resources::HandlerRegistry;
use crate::state::ResourceRecord;

use super::canonical::{canonical_string, render_value, values_equal};

/// Keys filled in by providers; excluded from generic diffing.
pub const IGNORED_KEYS: &[&str] = &[
    "id",
    "droplet_id",
    "instance_id",
    "volume_id",
    "block_id",
    "record_id",
    "firewall_id",
    "load_balancer_id",
    "ip_address",
    "ipv6_address",
    "main_ip",
    "private_ip",
    "status",
    "created_at",
    "urn",
    "attached_droplet_id",
];

/// How a single property differs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldChange {
    /// Property of a resource that does not exist yet.
    Added {
        /// Desired value.
        value: Value,
    },
    /// Scalar or nested value changed.
    Changed {
        /// Recorded value, if any.
        old: Option<Value>,
        /// Desired value.
        new: Value,
        /// Note about how the change is applied.
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    /// Set difference of a list property.
    ListDelta {
        /// Elements present only in the desired list.
        added: Vec<Value>,
        /// Elements present only in the recorded list.
        removed: Vec<Value>,
    },
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffDetail {
    /// Property key.
    pub field: String,
    /// The change.
    #[serde(flatten)]
    pub change: FieldChange,
}

impl FieldChange {
    /// Renders the change as `old -> new`, or `+n -m` for lists.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Added { value } => format!("(none) -> {}", render_value(value)),
            Self::Changed { old, new, hint } => {
                let old = old.as_ref().map_or_else(|| "(none)".to_string(), render_value);
                let mut out = format!("{old} -> {}", render_value(new));
                if let Some(hint) = hint {
                    let _ = write!(out, " ({hint})");
                }
                out
            }
            Self::ListDelta { added, removed } => {
                let mut out = format!("+{} -{}", added.len(), removed.len());
                let mut parts = Vec::new();
                if !added.is_empty() {
                    parts.push(format!("added: {}", render_list(added)));
                }
                if !removed.is_empty() {
                    parts.push(format!("removed: {}", render_list(removed)));
                }
                if !parts.is_empty() {
                    let _ = write!(out, " ({})", parts.join("; "));
                }
                out
            }
        }
    }
}

fn render_list(items: &[Value]) -> String {
    items.iter().map(render_value).collect::<Vec<_>>().join(", ")
}

impl DiffDetail {
    /// Creates an addition entry.
    #[must_use]
    pub fn added(field: &str, value: &Value) -> Self {
        Self {
            field: field.to_string(),
            change: FieldChange::Added {
                value: value.clone(),
            },
        }
    }

    /// Creates a changed-value entry.
    #[must_use]
    pub fn changed(field: &str, old: Option<&Value>, new: &Value) -> Self {
        Self {
            field: field.to_string(),
            change: FieldChange::Changed {
                old: old.cloned(),
                new: new.clone(),
                hint: None,
            },
        }
    }

    /// Attaches a hint to a changed-value entry.
    #[must_use]
    pub fn with_hint(mut self, text: &str) -> Self {
        if let FieldChange::Changed { hint, .. } = &mut self.change {
            *hint = Some(text.to_string());
        }
        self
    }

    /// Desired value of a changed-value entry.
    #[must_use]
    pub const fn new_value(&self) -> Option<&Value> {
        match &self.change {
            FieldChange::Added { value } | FieldChange::Changed { new: value, .. } => Some(value),
            FieldChange::ListDelta { .. } => None,
        }
    }

    /// Added and removed elements of a list entry.
    #[must_use]
    pub fn list_delta(&self) -> Option<(&[Value], &[Value])> {
        match &self.change {
            FieldChange::ListDelta { added, removed } => Some((added.as_slice(), removed.as_slice())),
            _ => None,
        }
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.change.render())
    }
}

/// Compares a desired scalar (or nested mapping) with the recorded value.
/// A missing recorded key compares as absent.
#[must_use]
pub fn scalar_diff(field: &str, desired: &Value, recorded: Option<&Value>) -> Option<DiffDetail> {
    let equal = match recorded {
        Some(recorded) => values_equal(desired, recorded),
        None => desired.is_null(),
    };
    (!equal).then(|| DiffDetail::changed(field, recorded, desired))
}

/// Set difference of two lists. Mapping elements are compared through
/// their canonical form, so element and key order never matter.
#[must_use]
pub fn list_diff(field: &str, desired: &[Value], recorded: &[Value]) -> Option<DiffDetail> {
    let desired_keys: HashSet<String> = desired.iter().map(canonical_string).collect();
    let recorded_keys: HashSet<String> = recorded.iter().map(canonical_string).collect();

    let added = unique_missing(desired, &recorded_keys);
    let removed = unique_missing(recorded, &desired_keys);

    if added.is_empty() && removed.is_empty() {
        return None;
    }

    Some(DiffDetail {
        field: field.to_string(),
        change: FieldChange::ListDelta { added, removed },
    })
}

/// Elements of `items` whose canonical form is not in `other`, once each.
fn unique_missing(items: &[Value], other: &HashSet<String>) -> Vec<Value> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| {
            let key = canonical_string(item);
            !other.contains(&key) && seen.insert(key)
        })
        .cloned()
        .collect()
}

/// Compares one property, as a list if the desired value is one.
#[must_use]
pub fn property_diff(field: &str, desired: &Value, recorded: Option<&Value>) -> Option<DiffDetail> {
    match desired {
        Value::Array(items) => {
            let recorded_items = recorded
                .and_then(Value::as_array)
                .map_or(&[][..], Vec::as_slice);
            list_diff(field, items, recorded_items)
        }
        _ => scalar_diff(field, desired, recorded),
    }
}

/// Engine for computing diffs between desired and recorded resources.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine<'r> {
    /// Handlers providing type-specific rules and computed keys.
    registry: &'r HandlerRegistry,
}

impl<'r> DiffEngine<'r> {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new(registry: &'r HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Computes the property differences of a matched pair. An empty
    /// result means nothing changed.
    #[must_use]
    pub fn diff(&self, desired: &ResourceSpec, recorded: &ResourceRecord) -> Vec<DiffDetail> {
        let mut details = Vec::new();
        let mut skip: HashSet<&str> = IGNORED_KEYS.iter().copied().collect();

        if let Some(handler) = self.registry.get(&desired.resource_type) {
            let typed = handler.diff(desired, recorded);
            skip.extend(typed.handled.iter().copied());
            skip.extend(handler.computed_keys().iter().copied());
            details.extend(typed.details);
        }

        for (key, value) in &desired.properties {
            if skip.contains(key.as_str()) {
                continue;
            }
            if let Some(detail) = property_diff(key, value, recorded.property(key)) {
                details.push(detail);
            }
        }

        trace!(
            "{} '{}': {} difference(s)",
            desired.resource_type,
            desired.name,
            details.len()
        );
        details
    }

    /// Lists every desired property as an addition, for resources that
    /// do not exist yet.
    #[must_use]
    pub fn additions(desired: &ResourceSpec) -> Vec<DiffDetail> {
        desired
            .properties
            .iter()
            .map(|(key, value)| DiffDetail::added(key, value))
            .collect()
    }
}
