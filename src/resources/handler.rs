//! Resource handler interface.
//!
//! A handler knows how one resource type maps onto provider calls: which
//! properties it needs, which changes it can apply in place, and how to
//! tear it down. The reconciler never looks inside properties itself.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Properties, ResourceSpec};
use crate::error::{ConfigError, ReconcileError, Result};
use crate::planner::DiffDetail;
use crate::planner::canonical::values_equal;
use crate::provider::{PollConfig, ProviderClient, ResourceAction, ResourceKind, ResourceRef, poll_until};
use crate::state::{ResourceRecord, State};

use super::registry::HandlerRegistry;

/// Result of a handler's type-specific diff rules.
#[derive(Debug, Default)]
pub struct TypedDiff {
    /// Differences found by the rules.
    pub details: Vec<DiffDetail>,
    /// Keys the rules took care of; skipped by the generic pass.
    pub handled: Vec<&'static str>,
}

/// Result of creating a resource.
#[derive(Debug, Default)]
pub struct CreateOutcome {
    /// Provider identifiers and observed values to merge into the record.
    pub observed: Properties,
    /// Desired keys that could not be applied, with the reason. They are
    /// left out of the record so the next run retries them.
    pub unapplied: Vec<(String, String)>,
}

/// Result of an in-place update.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Keys whose desired values are now in effect.
    pub applied: Vec<String>,
    /// Keys whose sub-operations failed, with the error.
    pub failed: Vec<(String, String)>,
    /// Keys with no in-place path.
    pub unsupported: Vec<String>,
    /// List keys where some steps failed, with the list now in effect.
    /// The error of each is in `failed`.
    pub partial: Vec<(String, Value)>,
    /// Observed values to merge into the record.
    pub observed: Properties,
}

impl UpdateOutcome {
    /// Records the result of one key's sub-operation.
    pub fn record(&mut self, field: &str, result: Result<()>) {
        match result {
            Ok(()) => self.applied.push(field.to_string()),
            Err(e) => self.failed.push((field.to_string(), e.to_string())),
        }
    }

    /// Marks a key as having no in-place path.
    pub fn unsupported(&mut self, field: &str) {
        self.unsupported.push(field.to_string());
    }

    /// Records a list key applied in independent steps. `current` is the
    /// list in effect after the steps that succeeded.
    pub fn record_steps(&mut self, field: &str, current: Vec<Value>, progressed: bool, errors: &[String]) {
        match (errors.is_empty(), progressed) {
            (true, _) => self.applied.push(field.to_string()),
            (false, true) => {
                self.partial.push((field.to_string(), Value::Array(current)));
                self.failed.push((field.to_string(), errors.join("; ")));
            }
            (false, false) => self.failed.push((field.to_string(), errors.join("; "))),
        }
    }

    /// Returns true if nothing was applied, even in part.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.partial.is_empty()
    }
}

/// The add step and the remove step of one list key.
#[derive(Debug)]
pub struct ListSteps<'v> {
    /// Elements to add.
    pub added: &'v [Value],
    /// Elements to remove.
    pub removed: &'v [Value],
    /// Action adding `added`.
    pub add: ResourceAction,
    /// Action removing `removed`.
    pub remove: ResourceAction,
}

impl<'v> ListSteps<'v> {
    /// Tag membership steps.
    #[must_use]
    pub fn tags(added: &'v [Value], removed: &'v [Value]) -> Self {
        Self {
            added,
            removed,
            add: ResourceAction::AddTags(string_items(added)),
            remove: ResourceAction::RemoveTags(string_items(removed)),
        }
    }

    /// Rule steps for the rule list `field`.
    #[must_use]
    pub fn rules(field: &str, added: &'v [Value], removed: &'v [Value]) -> Self {
        Self {
            added,
            removed,
            add: ResourceAction::AddRules {
                field: field.to_string(),
                rules: added.to_vec(),
            },
            remove: ResourceAction::RemoveRules {
                field: field.to_string(),
                rules: removed.to_vec(),
            },
        }
    }
}

/// Everything a handler needs during one operation.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    /// Client of the provider managing the resource.
    pub client: &'a dyn ProviderClient,
    /// Handler registry, for resolving references to other resources.
    pub registry: &'a HandlerRegistry,
    /// Recorded state at the time of the call.
    pub state: &'a State,
    /// Polling for provider-side waits.
    pub poll: PollConfig,
}

impl std::fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("client", &self.client.name())
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl<'a> HandlerContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(
        client: &'a dyn ProviderClient,
        registry: &'a HandlerRegistry,
        state: &'a State,
        poll: PollConfig,
    ) -> Self {
        Self {
            client,
            registry,
            state,
            poll,
        }
    }

    /// Resolves a resource name to the provider id of the recorded
    /// resource of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedReference`] if no such record
    /// exists or it has no identifier yet.
    pub fn resolve_id(&self, name: &str, kind: ResourceKind) -> Result<String> {
        self.state
            .resources
            .iter()
            .filter(|record| record.name == name)
            .find_map(|record| {
                let handler = self.registry.get(&record.resource_type)?;
                (handler.kind() == kind)
                    .then(|| handler.identifier(record))
                    .flatten()
            })
            .ok_or_else(|| {
                ConfigError::UnresolvedReference {
                    name: name.to_string(),
                    kind: kind.to_string(),
                }
                .into()
            })
    }

    /// Resolves a list of resource names. Numbers are taken as raw ids.
    ///
    /// # Errors
    ///
    /// Returns the first unresolvable name.
    pub fn resolve_ids(&self, names: &[Value], kind: ResourceKind) -> Result<Vec<String>> {
        names
            .iter()
            .map(|value| match value {
                Value::Number(n) => Ok(n.to_string()),
                Value::String(name) => self.resolve_id(name, kind),
                other => Err(ConfigError::validation_general(format!(
                    "expected a {kind} name, found {other}"
                ))
                .into()),
            })
            .collect()
    }

    /// Polls an object until its status is one of `ready`. Objects that
    /// report no status are taken as ready.
    ///
    /// # Errors
    ///
    /// Returns the read error, or a timeout.
    pub async fn wait_for_status(&self, target: &ResourceRef, ready: &[&str]) -> Result<Properties> {
        let client = self.client;
        let expected = ready.join("|");
        debug!("Waiting for {target} to become {expected}");

        poll_until(self.poll, &target.to_string(), &expected, move || async move {
            let observed = client.read_resource(target).await?;
            let is_ready = match observed.get("status").and_then(Value::as_str) {
                Some(status) => ready.contains(&status),
                None => true,
            };
            Ok(is_ready.then_some(observed))
        })
        .await
    }

    /// Applies a list delta to `field`, adding first. A failed step does
    /// not undo the other; the list left in effect is recorded.
    pub async fn perform_list_delta(
        &self,
        outcome: &mut UpdateOutcome,
        field: &str,
        target: &ResourceRef,
        recorded: Vec<Value>,
        steps: ListSteps<'_>,
    ) {
        let mut current = recorded;
        let mut errors = Vec::new();
        let mut progressed = false;

        if !steps.added.is_empty() {
            match self.client.perform(target, &steps.add).await {
                Ok(()) => {
                    for value in steps.added {
                        if !current.iter().any(|v| values_equal(v, value)) {
                            current.push(value.clone());
                        }
                    }
                    progressed = true;
                }
                Err(e) => errors.push(format!("{} failed: {e}", steps.add.name())),
            }
        }

        if !steps.removed.is_empty() {
            match self.client.perform(target, &steps.remove).await {
                Ok(()) => {
                    current.retain(|v| !steps.removed.iter().any(|r| values_equal(v, r)));
                    progressed = true;
                }
                Err(e) => errors.push(format!("{} failed: {e}", steps.remove.name())),
            }
        }

        outcome.record_steps(field, current, progressed, &errors);
    }

    /// Runs actions in order and converts the result into the outcome of
    /// `field`. Stops at the first failure.
    pub async fn perform_for(
        &self,
        outcome: &mut UpdateOutcome,
        field: &str,
        target: &ResourceRef,
        actions: &[ResourceAction],
    ) {
        let mut result = Ok(());
        for action in actions {
            if let Err(e) = self.client.perform(target, action).await {
                result = Err(e);
                break;
            }
        }
        outcome.record(field, result);
    }
}

/// Type-specific behaviour of one resource type.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Canonical type tag.
    fn type_name(&self) -> &'static str;

    /// Alternative type tags accepted in configuration.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Provider object kind.
    fn kind(&self) -> ResourceKind;

    /// Property holding the provider-assigned identifier.
    fn id_key(&self) -> &'static str;

    /// Extra provider-computed keys excluded from diffing.
    fn computed_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Properties a create call cannot do without.
    fn required_properties(&self) -> &'static [&'static str] {
        &[]
    }

    /// Names of other resources this one refers to. Used to order
    /// destruction so dependents go first.
    fn references(&self, _properties: &Properties) -> Vec<String> {
        Vec::new()
    }

    /// Type-specific diff rules. Runs before the generic comparison.
    fn diff(&self, _desired: &ResourceSpec, _recorded: &ResourceRecord) -> TypedDiff {
        TypedDiff::default()
    }

    /// Creates the resource.
    async fn create(&self, ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<CreateOutcome>;

    /// Applies the listed changes in place where possible.
    async fn update(
        &self,
        _ctx: &HandlerContext<'_>,
        _record: &ResourceRecord,
        _spec: &ResourceSpec,
        changes: &[DiffDetail],
    ) -> Result<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        for change in changes {
            outcome.unsupported(&change.field);
        }
        Ok(outcome)
    }

    /// Deletes the resource.
    async fn delete(&self, ctx: &HandlerContext<'_>, record: &ResourceRecord) -> Result<()>;

    /// Reads the provider identifier out of a record.
    fn identifier(&self, record: &ResourceRecord) -> Option<String> {
        record.id_property(self.id_key())
    }

    /// Builds the provider reference of a recorded resource.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MissingIdentifier`] if the record has no
    /// identifier.
    fn target(&self, record: &ResourceRecord) -> Result<ResourceRef> {
        let id = self
            .identifier(record)
            .ok_or_else(|| ReconcileError::MissingIdentifier {
                resource_type: record.resource_type.clone(),
                name: record.name.clone(),
                key: self.id_key().to_string(),
            })?;
        Ok(ResourceRef::new(self.kind(), id))
    }
}

/// Checks that a resource carries every required property.
///
/// # Errors
///
/// Returns [`ConfigError::MissingProperty`] naming the first missing key.
pub fn check_required(handler: &dyn ResourceHandler, spec: &ResourceSpec) -> Result<()> {
    match handler
        .required_properties()
        .iter()
        .find(|key| spec.property(key).is_none_or(Value::is_null))
    {
        Some(key) => Err(ConfigError::MissingProperty {
            resource: spec.name.clone(),
            property: (*key).to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Copies the listed keys of `properties` into a payload, skipping nulls.
#[must_use]
pub fn payload_from(properties: &Properties, keys: &[&str]) -> Properties {
    keys.iter()
        .filter_map(|key| {
            properties
                .get(*key)
                .filter(|v| !v.is_null())
                .map(|v| ((*key).to_string(), v.clone()))
        })
        .collect()
}

/// Moves the observed `id` under the handler's id key.
#[must_use]
pub fn rename_id(mut observed: Properties, id_key: &str) -> Properties {
    if let Some(id) = observed.shift_remove("id") {
        observed.insert(id_key.to_string(), id);
    }
    observed
}

/// Strings of a list value, skipping anything else.
#[must_use]
pub fn string_items(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Deletes an object, treating "already gone" as success.
///
/// # Errors
///
/// Returns any provider error other than not-found.
pub async fn delete_ignoring_missing(client: &dyn ProviderClient, target: &ResourceRef) -> Result<()> {
    match client.delete_resource(target).await {
        Err(e) if e.is_not_found() => {
            warn!("{target} was already deleted");
            Ok(())
        }
        other => other,
    }
}

/// Elements of a list property; empty if absent or not a list.
#[must_use]
pub fn list_property(properties: &Properties, key: &str) -> Vec<Value> {
    properties
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Applies a droplet membership delta to the `droplets` key of a firewall
/// or load balancer, one attach or detach at a time. The names that
/// succeeded go to `droplets` and their ids to `resolved_key`. Removed
/// names that no longer resolve are skipped.
pub async fn sync_droplets(
    ctx: &HandlerContext<'_>,
    outcome: &mut UpdateOutcome,
    target: &ResourceRef,
    record: &ResourceRecord,
    resolved_key: &str,
    (added, removed): (&[Value], &[Value]),
) {
    let mut names = list_property(&record.properties, "droplets");
    let mut ids = string_items(&list_property(&record.properties, resolved_key));
    let mut errors = Vec::new();
    let mut progressed = false;

    for value in added {
        let resolved = ctx.resolve_ids(std::slice::from_ref(value), ResourceKind::Droplet);
        let droplet_id = match resolved.map(|ids| ids.into_iter().next()) {
            Ok(Some(droplet_id)) => droplet_id,
            Ok(None) => continue,
            Err(e) => {
                errors.push(format!("attaching {value} failed: {e}"));
                continue;
            }
        };
        let attach = ResourceAction::Attach {
            target_id: droplet_id.clone(),
            region: None,
        };
        match ctx.client.perform(target, &attach).await {
            Ok(()) => {
                if !ids.contains(&droplet_id) {
                    ids.push(droplet_id);
                }
                if !names.contains(value) {
                    names.push(value.clone());
                }
                progressed = true;
            }
            Err(e) => errors.push(format!("attaching {value} failed: {e}")),
        }
    }

    for value in removed {
        let resolved = ctx.resolve_ids(std::slice::from_ref(value), ResourceKind::Droplet);
        let Some(droplet_id) = resolved.ok().and_then(|ids| ids.into_iter().next()) else {
            warn!("Cannot resolve removed droplet {value}, skipping detach");
            names.retain(|name| name != value);
            progressed = true;
            continue;
        };
        let detach = ResourceAction::Detach {
            target_id: droplet_id.clone(),
            region: None,
        };
        match ctx.client.perform(target, &detach).await {
            Ok(()) => {
                ids.retain(|id| *id != droplet_id);
                names.retain(|name| name != value);
                progressed = true;
            }
            Err(e) => errors.push(format!("detaching {value} failed: {e}")),
        }
    }

    if progressed {
        outcome.observed.insert(
            resolved_key.to_string(),
            Value::Array(ids.into_iter().map(Value::String).collect()),
        );
    }
    outcome.record_steps("droplets", names, progressed, &errors);
}
