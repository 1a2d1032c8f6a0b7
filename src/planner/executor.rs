//! Plan executor.
//!
//! Applies a deploy plan resource by resource, or destroys every recorded
//! resource. A failure stops at the boundary of the resource it belongs
//! to; only state store errors abort the run. The state is persisted after
//! each successful mutation.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ResourceSpec;
use crate::error::{ConfigError, FerraformError, PlanError, Result};
use crate::provider::{PollConfig, ProviderSet};
use crate::resources::{HandlerContext, HandlerRegistry, ResourceHandler, check_required};
use crate::state::{ResourceRecord, StateStore, TrackedState};

use super::diff::DiffDetail;
use super::plan::{ChangeAction, Plan, PlanMode, PlannedChange};

/// Final status of one resource in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Created and recorded.
    Created,
    /// Every change applied in place.
    Updated,
    /// Nothing to do.
    Unchanged,
    /// Deleted and forgotten.
    Destroyed,
    /// Left alone with a warning.
    Skipped,
    /// Nothing applied; the record, if any, is untouched.
    Failed,
    /// Some changes applied, others did not.
    Partial,
}

/// What happened to one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceOutcome {
    /// Resource name.
    pub name: String,
    /// Resource type tag.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Final status.
    pub status: OutcomeStatus,
    /// Error of a failed resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal problems, one per property.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ResourceOutcome {
    fn new(name: &str, resource_type: &str, status: OutcomeStatus) -> Self {
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            status,
            error: None,
            warnings: Vec::new(),
        }
    }

    fn failed(name: &str, resource_type: &str, error: &FerraformError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(name, resource_type, OutcomeStatus::Failed)
        }
    }

    /// Returns true unless the resource failed or was only partly applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed | OutcomeStatus::Partial)
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Destroyed => "destroyed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Partial => "partial",
        };
        write!(f, "{s}")
    }
}

/// Executes plans against the configured providers.
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    /// Provider clients.
    providers: &'a ProviderSet,
    /// Resource handlers.
    registry: &'a HandlerRegistry,
    /// Polling for provider-side waits.
    poll: PollConfig,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new executor.
    #[must_use]
    pub const fn new(providers: &'a ProviderSet, registry: &'a HandlerRegistry, poll: PollConfig) -> Self {
        Self {
            providers,
            registry,
            poll,
        }
    }

    /// Applies a deploy plan in plan order.
    ///
    /// # Errors
    ///
    /// Returns an error for a destroy plan, or when the state store fails.
    pub async fn apply<S: StateStore + ?Sized>(
        &self,
        plan: &Plan,
        tracked: &mut TrackedState<'_, S>,
    ) -> Result<Vec<ResourceOutcome>> {
        if plan.mode != PlanMode::Deploy {
            return Err(PlanError::ModeMismatch {
                expected: "deploy".to_string(),
                found: "destroy".to_string(),
            }
            .into());
        }

        let mut outcomes = Vec::with_capacity(plan.changes.len());
        for change in &plan.changes {
            if change.action != ChangeAction::NoChange {
                tracked.keep_lock_alive().await?;
            }
            let result = match (change.action, &change.spec) {
                (ChangeAction::NoChange, _) => {
                    debug!("{} '{}' is up to date", change.resource_type, change.name);
                    Ok(ResourceOutcome::new(&change.name, &change.resource_type, OutcomeStatus::Unchanged))
                }
                (ChangeAction::Create, Some(spec)) => self.create(spec, tracked).await,
                (ChangeAction::Update, Some(spec)) => self.update(spec, &change.details, tracked).await,
                _ => Ok(Self::skip_unexpected(change)),
            };
            outcomes.push(Self::settle(&change.name, &change.resource_type, result)?);
        }

        Ok(outcomes)
    }

    /// Destroys every recorded resource, dependents first and otherwise in
    /// reverse insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error only when the state store fails.
    pub async fn destroy<S: StateStore + ?Sized>(
        &self,
        tracked: &mut TrackedState<'_, S>,
    ) -> Result<Vec<ResourceOutcome>> {
        let order: Vec<(String, String)> = destroy_order(&tracked.state().resources, self.registry)
            .into_iter()
            .filter_map(|index| tracked.state().resources.get(index))
            .map(|record| (record.name.clone(), record.resource_type.clone()))
            .collect();

        let mut outcomes = Vec::with_capacity(order.len());
        for (name, resource_type) in order {
            let Some(record) = tracked.state().find(&name, &resource_type).cloned() else {
                continue;
            };
            tracked.keep_lock_alive().await?;
            let result = self.delete(record, tracked).await;
            outcomes.push(Self::settle(&name, &resource_type, result)?);
        }

        Ok(outcomes)
    }

    /// Turns a per-resource error into a failed outcome, letting store
    /// errors through.
    fn settle(name: &str, resource_type: &str, result: Result<ResourceOutcome>) -> Result<ResourceOutcome> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal_for_run() => {
                error!("Aborting run at {resource_type} '{name}': {e}");
                Err(e)
            }
            Err(e) => {
                error!("Failed to reconcile {resource_type} '{name}': {e}");
                Ok(ResourceOutcome::failed(name, resource_type, &e))
            }
        }
    }

    fn skip_unexpected(change: &PlannedChange) -> ResourceOutcome {
        warn!(
            "Ignoring {} entry for {} '{}' in a deploy plan",
            change.action, change.resource_type, change.name
        );
        ResourceOutcome::new(&change.name, &change.resource_type, OutcomeStatus::Skipped)
    }

    fn handler(&self, resource_type: &str) -> Result<&'a dyn ResourceHandler> {
        self.registry.get(resource_type).ok_or_else(|| {
            ConfigError::UnsupportedResourceType {
                resource_type: resource_type.to_string(),
            }
            .into()
        })
    }

    async fn create<S: StateStore + ?Sized>(
        &self,
        spec: &ResourceSpec,
        tracked: &mut TrackedState<'_, S>,
    ) -> Result<ResourceOutcome> {
        let handler = self.handler(&spec.resource_type)?;
        check_required(handler, spec)?;
        let (provider, client) = self.providers.resolve(spec.provider.as_deref())?;

        info!("Creating {} '{}' on {provider}", spec.resource_type, spec.name);
        let created = {
            let ctx = HandlerContext::new(client.as_ref(), self.registry, tracked.state(), self.poll);
            handler.create(&ctx, spec).await?
        };

        let mut record = ResourceRecord::from_spec(spec, &provider, created.observed);
        let mut outcome = ResourceOutcome::new(&spec.name, &spec.resource_type, OutcomeStatus::Created);
        for (key, reason) in created.unapplied {
            warn!("{} '{}': '{key}' was not applied: {reason}", spec.resource_type, spec.name);
            record.properties.shift_remove(&key);
            outcome.warnings.push(format!("{key}: {reason}"));
            outcome.status = OutcomeStatus::Partial;
        }

        tracked.upsert(record).await?;
        Ok(outcome)
    }

    async fn update<S: StateStore + ?Sized>(
        &self,
        spec: &ResourceSpec,
        details: &[DiffDetail],
        tracked: &mut TrackedState<'_, S>,
    ) -> Result<ResourceOutcome> {
        let handler = self.handler(&spec.resource_type)?;
        let Some(mut record) = tracked.state().find(&spec.name, &spec.resource_type).cloned() else {
            return self.create(spec, tracked).await;
        };
        let (provider, client) = self
            .providers
            .resolve(record.provider.as_deref().or(spec.provider.as_deref()))?;

        info!("Updating {} '{}' on {provider}", spec.resource_type, spec.name);
        let result = {
            let ctx = HandlerContext::new(client.as_ref(), self.registry, tracked.state(), self.poll);
            handler.update(&ctx, &record, spec, details).await?
        };

        let mut outcome = ResourceOutcome::new(&spec.name, &spec.resource_type, OutcomeStatus::Updated);
        for field in &result.unsupported {
            warn!(
                "{} '{}': '{field}' cannot be changed in place, leaving it as is",
                spec.resource_type, spec.name
            );
            outcome.warnings.push(format!("{field}: no in-place update"));
        }
        for (field, reason) in &result.failed {
            warn!("{} '{}': updating '{field}' failed: {reason}", spec.resource_type, spec.name);
            outcome.warnings.push(format!("{field}: {reason}"));
        }

        if result.is_noop() && result.observed.is_empty() {
            outcome.status = if result.failed.is_empty() {
                OutcomeStatus::Skipped
            } else {
                OutcomeStatus::Failed
            };
            return Ok(outcome);
        }

        for field in &result.applied {
            match spec.property(field) {
                Some(value) => {
                    record.properties.insert(field.clone(), value.clone());
                }
                None => {
                    record.properties.shift_remove(field);
                }
            }
        }
        for (field, current) in result.partial {
            record.properties.insert(field, current);
        }
        record.merge_observed(result.observed);
        if record.provider.is_none() {
            record.provider = Some(provider);
        }
        tracked.upsert(record).await?;

        if !outcome.warnings.is_empty() {
            outcome.status = OutcomeStatus::Partial;
        }
        Ok(outcome)
    }

    async fn delete<S: StateStore + ?Sized>(
        &self,
        record: ResourceRecord,
        tracked: &mut TrackedState<'_, S>,
    ) -> Result<ResourceOutcome> {
        let handler = self.handler(&record.resource_type)?;
        if handler.identifier(&record).is_none() {
            warn!(
                "{} '{}' has no recorded '{}', skipping",
                record.resource_type,
                record.name,
                handler.id_key()
            );
            let mut outcome = ResourceOutcome::new(&record.name, &record.resource_type, OutcomeStatus::Skipped);
            outcome.warnings.push(format!("no recorded {}", handler.id_key()));
            return Ok(outcome);
        }
        let (provider, client) = self.providers.resolve(record.provider.as_deref())?;

        info!("Destroying {} '{}' on {provider}", record.resource_type, record.name);
        {
            let ctx = HandlerContext::new(client.as_ref(), self.registry, tracked.state(), self.poll);
            handler.delete(&ctx, &record).await?;
        }

        tracked.remove(&record.name, &record.resource_type).await?;
        Ok(ResourceOutcome::new(&record.name, &record.resource_type, OutcomeStatus::Destroyed))
    }
}

/// Orders records for destruction: reverse insertion order, except that a
/// record referring to another by name always comes before it.
#[must_use]
pub fn destroy_order(records: &[ResourceRecord], registry: &HandlerRegistry) -> Vec<usize> {
    let count = records.len();
    let mut before: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut pending = vec![0usize; count];

    for (dependent, record) in records.iter().enumerate() {
        let Some(handler) = registry.get(&record.resource_type) else {
            continue;
        };
        let references = handler.references(&record.properties);
        for (target, other) in records.iter().enumerate() {
            if target != dependent && references.contains(&other.name) {
                before[dependent].push(target);
                pending[target] += 1;
            }
        }
    }

    let mut done = vec![false; count];
    let mut order = Vec::with_capacity(count);
    while order.len() < count {
        let next = (0..count)
            .rev()
            .find(|&i| !done[i] && pending[i] == 0)
            .or_else(|| (0..count).rev().find(|&i| !done[i]));
        let Some(index) = next else {
            break;
        };
        done[index] = true;
        order.push(index);
        for &target in &before[index] {
            pending[target] = pending[target].saturating_sub(1);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;
    use crate::error::ProviderError;
    use crate::planner::Planner;
    use crate::provider::mock::MockProvider;
    use crate::provider::{ProviderClient, ResourceAction, ResourceKind};
    use crate::state::{LocalStateStore, State};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    fn providers(client: MockProvider) -> ProviderSet {
        let client: Arc<dyn ProviderClient> = Arc::new(client);
        ProviderSet::new("digitalocean").with_client("digitalocean", client)
    }

    fn record(name: &str, resource_type: &str, properties: Value) -> ResourceRecord {
        ResourceRecord::from_spec(
            &ResourceSpec::new(name, resource_type, props(properties)),
            "digitalocean",
            Properties::new(),
        )
    }

    #[test]
    fn test_destroy_order_puts_dependents_first() {
        let registry = HandlerRegistry::with_defaults();
        let records = vec![
            record("volA", "volume", json!({"attach_to": "inst1", "volume_id": "v-1"})),
            record("inst1", "droplet", json!({"droplet_id": 1})),
        ];
        assert_eq!(destroy_order(&records, &registry), vec![0, 1]);

        let independent = vec![
            record("a", "droplet", json!({})),
            record("b", "volume", json!({})),
            record("c", "domain", json!({})),
        ];
        assert_eq!(destroy_order(&independent, &registry), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_resize_is_the_only_provider_path() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();

        let mut state = State::new();
        state.upsert(record(
            "web1",
            "droplet",
            json!({"region": "nyc3", "size": "s-1vcpu-1gb", "image": "ubuntu-22-04-x64", "droplet_id": 7}),
        ));
        let mut tracked = TrackedState::new(&store, state);

        let mut client = MockProvider::new();
        client.expect_perform().times(3).returning(|_, _| Ok(()));
        client
            .expect_read_resource()
            .returning(|_| Ok(props(json!({"id": 7, "status": "active"}))));
        client.expect_create_resource().never();
        client.expect_delete_resource().never();
        let providers = providers(client);

        let desired = vec![ResourceSpec::new(
            "web1",
            "droplet",
            props(json!({"region": "nyc3", "size": "s-2vcpu-2gb", "image": "ubuntu-22-04-x64"})),
        )];
        let plan = Planner::new(&registry).plan(&desired, tracked.state(), "hash");
        let outcomes = PlanExecutor::new(&providers, &registry, fast())
            .apply(&plan, &mut tracked)
            .await
            .expect("apply");

        assert_eq!(outcomes[0].status, OutcomeStatus::Updated);
        let saved = store.load().await.expect("load").expect("state exists");
        assert_eq!(saved.resources[0].property("size"), Some(&json!("s-2vcpu-2gb")));
    }

    #[tokio::test]
    async fn test_half_applied_tag_change_is_recorded() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();

        let mut state = State::new();
        state.upsert(record(
            "web1",
            "droplet",
            json!({"region": "nyc3", "size": "s-1vcpu-1gb", "tags": ["a"], "droplet_id": 7}),
        ));
        let mut tracked = TrackedState::new(&store, state);

        let mut client = MockProvider::new();
        client
            .expect_perform()
            .withf(|_, action| *action == ResourceAction::AddTags(vec!["b".to_string()]))
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_perform()
            .withf(|_, action| matches!(action, ResourceAction::RemoveTags(_)))
            .times(1)
            .returning(|_, _| Err(ProviderError::api_error("digitalocean", 500, "tag service down").into()));
        let providers = providers(client);

        let desired = vec![ResourceSpec::new(
            "web1",
            "droplet",
            props(json!({"region": "nyc3", "size": "s-1vcpu-1gb", "tags": ["b"]})),
        )];
        let plan = Planner::new(&registry).plan(&desired, tracked.state(), "hash");
        let outcomes = PlanExecutor::new(&providers, &registry, fast())
            .apply(&plan, &mut tracked)
            .await
            .expect("apply");

        assert_eq!(outcomes[0].status, OutcomeStatus::Partial);
        assert!(outcomes[0].warnings[0].starts_with("tags: remove tags failed"));

        let saved = store.load().await.expect("load").expect("state exists");
        assert_eq!(saved.resources[0].property("tags"), Some(&json!(["a", "b"])));

        let next = Planner::new(&registry).plan(&desired, &saved, "hash");
        let (added, removed) = next.changes[0].details[0].list_delta().expect("tag delta");
        assert!(added.is_empty());
        assert_eq!(removed, [json!("a")]);
    }

    #[tokio::test]
    async fn test_droplet_that_never_boots_is_still_recorded() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let mut tracked = TrackedState::load(&store).await.expect("load");

        let mut client = MockProvider::new();
        client
            .expect_create_resource()
            .times(1)
            .returning(|_, _| Ok(props(json!({"id": 9, "status": "new"}))));
        client
            .expect_read_resource()
            .returning(|_| Ok(props(json!({"id": 9, "status": "new"}))));
        let providers = providers(client);

        let desired = vec![ResourceSpec::new(
            "web1",
            "droplet",
            props(json!({"region": "nyc3", "size": "s-1vcpu-1gb", "image": "ubuntu-22-04-x64"})),
        )];
        let plan = Planner::new(&registry).plan(&desired, tracked.state(), "hash");
        let outcomes = PlanExecutor::new(&providers, &registry, fast())
            .apply(&plan, &mut tracked)
            .await
            .expect("apply");

        assert_eq!(outcomes[0].status, OutcomeStatus::Partial);
        let saved = store.load().await.expect("load").expect("state exists");
        assert_eq!(saved.resources[0].id_property("droplet_id").as_deref(), Some("9"));

        let next = Planner::new(&registry).plan(&desired, &saved, "hash");
        assert_eq!(next.changes[0].action, ChangeAction::NoChange);
    }

    #[tokio::test]
    async fn test_unsupported_change_is_skipped_not_recreated() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();

        let mut state = State::new();
        state.upsert(record("web1", "droplet", json!({"region": "nyc3", "droplet_id": 7})));
        let mut tracked = TrackedState::new(&store, state);

        let mut client = MockProvider::new();
        client.expect_perform().never();
        client.expect_create_resource().never();
        client.expect_delete_resource().never();
        let providers = providers(client);

        let desired = vec![ResourceSpec::new("web1", "droplet", props(json!({"region": "sfo3"})))];
        let plan = Planner::new(&registry).plan(&desired, tracked.state(), "hash");
        let outcomes = PlanExecutor::new(&providers, &registry, fast())
            .apply(&plan, &mut tracked)
            .await
            .expect("apply");

        assert_eq!(outcomes[0].status, OutcomeStatus::Skipped);
        assert_eq!(outcomes[0].warnings.len(), 1);
        assert_eq!(tracked.state().resources[0].property("region"), Some(&json!("nyc3")));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_one_resource_only() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let mut tracked = TrackedState::load(&store).await.expect("load");

        let mut client = MockProvider::new();
        client
            .expect_create_resource()
            .withf(|kind, _| *kind == ResourceKind::Domain)
            .times(1)
            .returning(|_, _| Ok(props(json!({"name": "example.com"}))));
        let providers = providers(client);

        let desired = vec![
            ResourceSpec::new("web1", "droplet", props(json!({"region": "ewr", "size": "vc2-1c-1gb", "image": "ubuntu"})))
                .with_provider("vultr"),
            ResourceSpec::new("example.com", "domain", Properties::new()),
        ];
        let plan = Planner::new(&registry).plan(&desired, tracked.state(), "hash");
        let outcomes = PlanExecutor::new(&providers, &registry, fast())
            .apply(&plan, &mut tracked)
            .await
            .expect("apply");

        assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
        assert_eq!(outcomes[1].status, OutcomeStatus::Created);
        assert_eq!(tracked.state().len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_keeps_record_of_failed_delete() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();

        let mut state = State::new();
        state.upsert(record("volA", "volume", json!({"attach_to": "inst1", "volume_id": "v-1", "region": "nyc3"})));
        state.upsert(record("inst1", "droplet", json!({"droplet_id": 1})));
        let mut tracked = TrackedState::new(&store, state);

        let mut client = MockProvider::new();
        client
            .expect_perform()
            .withf(|_, action| matches!(action, ResourceAction::Detach { .. }))
            .returning(|_, _| Ok(()));
        client
            .expect_delete_resource()
            .withf(|target| target.kind == ResourceKind::Volume)
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_delete_resource()
            .withf(|target| target.kind == ResourceKind::Droplet)
            .times(1)
            .returning(|_| Err(ProviderError::api_error("digitalocean", 500, "boom").into()));
        let providers = providers(client);

        let outcomes = PlanExecutor::new(&providers, &registry, fast())
            .destroy(&mut tracked)
            .await
            .expect("destroy");

        assert_eq!(outcomes[0].name, "volA");
        assert_eq!(outcomes[0].status, OutcomeStatus::Destroyed);
        assert_eq!(outcomes[1].status, OutcomeStatus::Failed);

        let saved = store.load().await.expect("load").expect("state exists");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved.resources[0].name, "inst1");
    }

    #[tokio::test]
    async fn test_destroy_plan_is_rejected_by_apply() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let mut tracked = TrackedState::load(&store).await.expect("load");
        let providers = providers(MockProvider::new());

        let plan = Planner::new(&registry).destroy_plan(tracked.state());
        let result = PlanExecutor::new(&providers, &registry, fast())
            .apply(&plan, &mut tracked)
            .await;
        assert!(matches!(result, Err(FerraformError::Plan(PlanError::ModeMismatch { .. }))));
    }
}
