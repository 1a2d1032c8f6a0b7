//! Plan types and construction.
//!
//! A plan pairs every desired resource with its recorded counterpart and
//! classifies it. Plans are recomputed on every invocation and never
//! persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ResourceSpec;
use crate::resources::HandlerRegistry;
use crate::state::State;

use super::diff::{DiffDetail, DiffEngine};

/// A complete plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Whether this plan deploys or destroys.
    pub mode: PlanMode,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the desired configuration; empty for destroy plans.
    pub config_hash: String,
    /// Planned changes in processing order.
    pub changes: Vec<PlannedChange>,
}

/// What a plan was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Converge recorded state onto the desired resources.
    Deploy,
    /// Tear down every recorded resource.
    Destroy,
}

/// A single planned change.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    /// Resource name.
    pub name: String,
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Classification.
    pub action: ChangeAction,
    /// Property differences. Empty for unchanged and destroyed resources.
    pub details: Vec<DiffDetail>,
    /// Desired resource, for deploy plans.
    #[serde(skip)]
    pub spec: Option<ResourceSpec>,
}

/// Classification of a resource in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Not recorded yet.
    Create,
    /// Recorded with differing properties.
    Update,
    /// Recorded and identical.
    NoChange,
    /// Recorded and to be deleted.
    Destroy,
}

/// Number of changes per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    /// Resources to create.
    pub create: usize,
    /// Resources to update.
    pub update: usize,
    /// Resources left alone.
    pub unchanged: usize,
    /// Resources to destroy.
    pub destroy: usize,
}

impl Plan {
    /// Counts the changes per action.
    #[must_use]
    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for change in &self.changes {
            match change.action {
                ChangeAction::Create => counts.create += 1,
                ChangeAction::Update => counts.update += 1,
                ChangeAction::NoChange => counts.unchanged += 1,
                ChangeAction::Destroy => counts.destroy += 1,
            }
        }
        counts
    }

    /// Returns true if applying the plan would touch a provider.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.action != ChangeAction::NoChange)
    }

    /// Returns true if the plan lists no resources at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the trailing summary line.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let counts = self.counts();
        match self.mode {
            PlanMode::Deploy => format!(
                "Plan: {} to create, {} to update, {} unchanged.",
                counts.create, counts.update, counts.unchanged
            ),
            PlanMode::Destroy => format!("Plan: {} to destroy.", counts.destroy),
        }
    }
}

impl PlannedChange {
    /// Renders the differences on one line.
    #[must_use]
    pub fn details_text(&self) -> String {
        self.details
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no-change",
            Self::Destroy => "destroy",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} '{}'", self.action, self.resource_type, self.name)?;
        if !self.details.is_empty() {
            write!(f, " ({})", self.details_text())?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for change in &self.changes {
            writeln!(f, "  {change}")?;
        }
        write!(f, "{}", self.summary_line())
    }
}

/// Builds plans from desired resources and recorded state. Pure.
#[derive(Debug, Clone, Copy)]
pub struct Planner<'r> {
    engine: DiffEngine<'r>,
}

impl<'r> Planner<'r> {
    /// Creates a planner using the given handlers' diff rules.
    #[must_use]
    pub const fn new(registry: &'r HandlerRegistry) -> Self {
        Self {
            engine: DiffEngine::new(registry),
        }
    }

    /// Plans a deploy. One change per desired resource, in desired order.
    #[must_use]
    pub fn plan(&self, desired: &[ResourceSpec], state: &State, config_hash: &str) -> Plan {
        let changes = desired
            .iter()
            .map(|spec| {
                let (action, details) = match state.find(&spec.name, &spec.resource_type) {
                    None => (ChangeAction::Create, DiffEngine::additions(spec)),
                    Some(record) => {
                        let details = self.engine.diff(spec, record);
                        if details.is_empty() {
                            (ChangeAction::NoChange, details)
                        } else {
                            (ChangeAction::Update, details)
                        }
                    }
                };
                PlannedChange {
                    name: spec.name.clone(),
                    resource_type: spec.resource_type.clone(),
                    action,
                    details,
                    spec: Some(spec.clone()),
                }
            })
            .collect();

        Plan {
            mode: PlanMode::Deploy,
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            changes,
        }
    }

    /// Previews a destroy. One change per record, in recorded order.
    #[must_use]
    pub fn destroy_plan(&self, state: &State) -> Plan {
        let changes = state
            .resources
            .iter()
            .map(|record| PlannedChange {
                name: record.name.clone(),
                resource_type: record.resource_type.clone(),
                action: ChangeAction::Destroy,
                details: Vec::new(),
                spec: None,
            })
            .collect();

        Plan {
            mode: PlanMode::Destroy,
            created_at: Utc::now(),
            config_hash: String::new(),
            changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;
    use crate::state::ResourceRecord;
    use serde_json::{Value, json};

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    fn recorded(spec: &ResourceSpec, observed: Value) -> ResourceRecord {
        ResourceRecord::from_spec(spec, "digitalocean", props(observed))
    }

    #[test]
    fn test_unmatched_resource_is_created_with_all_properties() {
        let registry = HandlerRegistry::with_defaults();
        let spec = ResourceSpec::new(
            "web1",
            "droplet",
            props(json!({"region": "nyc3", "size": "s-1vcpu-1gb", "image": "ubuntu-22-04-x64"})),
        );

        let plan = Planner::new(&registry).plan(&[spec], &State::new(), "abc");

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].action, ChangeAction::Create);
        assert_eq!(plan.changes[0].details.len(), 3);
        assert_eq!(plan.summary_line(), "Plan: 1 to create, 0 to update, 0 unchanged.");
    }

    #[test]
    fn test_identical_resource_is_unchanged_despite_list_order() {
        let registry = HandlerRegistry::with_defaults();
        let mut state = State::new();
        let old = ResourceSpec::new("web1", "droplet", props(json!({"size": "s-1vcpu-1gb", "tags": ["a", "b"]})));
        state.upsert(recorded(&old, json!({"droplet_id": 1, "ip_address": "1.2.3.4", "status": "active"})));

        let desired = ResourceSpec::new("web1", "Droplet", props(json!({"tags": ["b", "a"], "size": "s-1vcpu-1gb"})));
        let plan = Planner::new(&registry).plan(&[desired], &state, "abc");

        assert_eq!(plan.changes[0].action, ChangeAction::NoChange);
        assert!(plan.changes[0].details.is_empty());
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_changed_size_is_an_update() {
        let registry = HandlerRegistry::with_defaults();
        let mut state = State::new();
        let old = ResourceSpec::new("web1", "droplet", props(json!({"size": "s-1vcpu-1gb"})));
        state.upsert(recorded(&old, json!({"droplet_id": 1})));

        let desired = ResourceSpec::new("web1", "droplet", props(json!({"size": "s-2vcpu-2gb"})));
        let plan = Planner::new(&registry).plan(&[desired], &state, "abc");

        let change = &plan.changes[0];
        assert_eq!(change.action, ChangeAction::Update);
        assert!(change.details_text().starts_with("size: s-1vcpu-1gb -> s-2vcpu-2gb"));
        assert_eq!(plan.counts().update, 1);
    }

    #[test]
    fn test_deploy_plan_follows_desired_order() {
        let registry = HandlerRegistry::with_defaults();
        let desired = vec![
            ResourceSpec::new("b", "volume", Properties::new()),
            ResourceSpec::new("a", "droplet", Properties::new()),
        ];
        let plan = Planner::new(&registry).plan(&desired, &State::new(), "abc");
        let names: Vec<_> = plan.changes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_destroy_plan_covers_every_record() {
        let registry = HandlerRegistry::with_defaults();
        let mut state = State::new();
        for name in ["vol-a", "inst-1", "inst-2"] {
            state.upsert(recorded(&ResourceSpec::new(name, "droplet", Properties::new()), json!({})));
        }

        let plan = Planner::new(&registry).destroy_plan(&state);

        assert_eq!(plan.changes.len(), state.len());
        assert!(plan.changes.iter().all(|c| c.action == ChangeAction::Destroy));
        assert_eq!(plan.changes[0].name, "vol-a");
        assert_eq!(plan.summary_line(), "Plan: 3 to destroy.");
    }
}
