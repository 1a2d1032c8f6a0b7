//! Reconciler driving deploy and destroy runs.
//!
//! A run takes the state lock, loads the recorded state, plans, executes
//! the plan resource by resource and appends a history entry. The lock is
//! released however the run ends.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, ResourceSpec};
use crate::error::Result;
use crate::planner::{OutcomeStatus, Plan, PlanExecutor, Planner, ResourceOutcome};
use crate::provider::{PollConfig, ProviderSet};
use crate::resources::HandlerRegistry;
use crate::state::{LockInfo, RunHistoryEntry, RunOperation, State, StateStore, TrackedState};

/// Runs plans against providers and keeps the state store current.
pub struct Reconciler<'a, S: StateStore + ?Sized> {
    /// State store.
    state_store: &'a S,
    /// Provider clients.
    providers: &'a ProviderSet,
    /// Resource handlers.
    registry: &'a HandlerRegistry,
    /// Polling for provider-side waits.
    poll: PollConfig,
    /// Lock holder identity; empty generates one.
    holder: String,
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Result of a deploy or destroy run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    /// Kind of run.
    pub operation: RunOperation,
    /// Whether every resource succeeded.
    pub success: bool,
    /// Hash of the desired configuration; empty for destroy runs.
    pub config_hash: String,
    /// Per-resource outcomes in processing order.
    pub outcomes: Vec<ResourceOutcome>,
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(state_store: &'a S, providers: &'a ProviderSet, registry: &'a HandlerRegistry) -> Self {
        Self {
            state_store,
            providers,
            registry,
            poll: PollConfig::default(),
            holder: String::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Sets the polling behaviour for provider-side waits.
    #[must_use]
    pub const fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the lock holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: &str) -> Self {
        self.holder = holder.to_string();
        self
    }

    /// Loads the recorded state, empty if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document is unreadable.
    pub async fn load_state(&self) -> Result<State> {
        Ok(self.state_store.load().await?.unwrap_or_default())
    }

    /// Plans a deploy against the current state without touching anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded.
    pub async fn plan(&self, desired: &[ResourceSpec]) -> Result<Plan> {
        let state = self.load_state().await?;
        let hash = self.hasher.hash_resources(desired);
        Ok(Planner::new(self.registry).plan(desired, &state, &hash))
    }

    /// Previews a destroy of everything recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded.
    pub async fn destroy_plan(&self) -> Result<Plan> {
        let state = self.load_state().await?;
        Ok(Planner::new(self.registry).destroy_plan(&state))
    }

    /// Converges the recorded state onto the desired resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere or the state store
    /// fails. Per-resource failures are reported in the result.
    pub async fn deploy(&self, desired: &[ResourceSpec]) -> Result<ReconciliationResult> {
        let lock = self
            .state_store
            .acquire_lock(&self.holder, &RunOperation::Deploy.to_string())
            .await?;
        let result = self.deploy_locked(desired, &lock).await;
        self.release(&lock.lock_id).await;
        result
    }

    /// Deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere or the state store
    /// fails. Per-resource failures are reported in the result.
    pub async fn destroy(&self) -> Result<ReconciliationResult> {
        let lock = self
            .state_store
            .acquire_lock(&self.holder, &RunOperation::Destroy.to_string())
            .await?;
        let result = self.destroy_locked(&lock).await;
        self.release(&lock.lock_id).await;
        result
    }

    async fn deploy_locked(&self, desired: &[ResourceSpec], lock: &LockInfo) -> Result<ReconciliationResult> {
        let mut tracked = TrackedState::load(self.state_store).await?.with_lock(lock);
        let hash = self.hasher.hash_resources(desired);
        let plan = Planner::new(self.registry).plan(desired, tracked.state(), &hash);

        let counts = plan.counts();
        info!(
            "Deploying {} resource(s): {} to create, {} to update, {} unchanged",
            plan.changes.len(),
            counts.create,
            counts.update,
            counts.unchanged
        );

        let outcomes = PlanExecutor::new(self.providers, self.registry, self.poll)
            .apply(&plan, &mut tracked)
            .await?;
        let result = ReconciliationResult::new(RunOperation::Deploy, &hash, outcomes);

        let applied_hash = result.success.then_some(hash.as_str());
        tracked.record_run(result.history_entry(), applied_hash).await?;
        info!("{}", result.summary_line());
        Ok(result)
    }

    async fn destroy_locked(&self, lock: &LockInfo) -> Result<ReconciliationResult> {
        let mut tracked = TrackedState::load(self.state_store).await?.with_lock(lock);
        if tracked.state().is_empty() {
            info!("Nothing recorded, nothing to destroy");
            return Ok(ReconciliationResult::new(RunOperation::Destroy, "", Vec::new()));
        }
        info!("Destroying {} recorded resource(s)", tracked.state().len());

        let outcomes = PlanExecutor::new(self.providers, self.registry, self.poll)
            .destroy(&mut tracked)
            .await?;
        let result = ReconciliationResult::new(RunOperation::Destroy, "", outcomes);

        let cleared = (result.success && tracked.state().is_empty()).then_some("");
        tracked.record_run(result.history_entry(), cleared).await?;
        info!("{}", result.summary_line());
        Ok(result)
    }

    async fn release(&self, lock_id: &str) {
        match self.state_store.release_lock(lock_id).await {
            Ok(()) => debug!("Released state lock {lock_id}"),
            Err(e) => warn!("Failed to release state lock {lock_id}: {e}"),
        }
    }
}

impl ReconciliationResult {
    /// Builds a result from the per-resource outcomes.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, outcomes: Vec<ResourceOutcome>) -> Self {
        Self {
            operation,
            success: outcomes.iter().all(ResourceOutcome::is_success),
            config_hash: config_hash.to_string(),
            outcomes,
        }
    }

    /// Number of resources that ended with the given status.
    #[must_use]
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Outcomes that failed or were only partly applied.
    pub fn problems(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// One-line summary of the run.
    #[must_use]
    pub fn summary_line(&self) -> String {
        match self.operation {
            RunOperation::Deploy => format!(
                "Deploy finished: {} created, {} updated, {} unchanged, {} skipped, {} partial, {} failed.",
                self.count(OutcomeStatus::Created),
                self.count(OutcomeStatus::Updated),
                self.count(OutcomeStatus::Unchanged),
                self.count(OutcomeStatus::Skipped),
                self.count(OutcomeStatus::Partial),
                self.count(OutcomeStatus::Failed),
            ),
            RunOperation::Destroy => format!(
                "Destroy finished: {} destroyed, {} skipped, {} failed.",
                self.count(OutcomeStatus::Destroyed),
                self.count(OutcomeStatus::Skipped),
                self.count(OutcomeStatus::Failed),
            ),
        }
    }

    fn history_entry(&self) -> RunHistoryEntry {
        let names = self.outcomes.iter().map(|o| o.name.clone()).collect();
        let entry = RunHistoryEntry::new(self.operation, &self.config_hash, names);
        let problems = self.problems().count();
        if problems == 0 {
            entry
        } else {
            entry.failed(&format!("{problems} resource(s) did not reconcile"))
        }
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.summary_line())?;
        for outcome in self.problems() {
            write!(f, "  - {} '{}' {}", outcome.resource_type, outcome.name, outcome.status)?;
            if let Some(error) = &outcome.error {
                write!(f, ": {error}")?;
            }
            writeln!(f)?;
            for warning in &outcome.warnings {
                writeln!(f, "      {warning}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;
    use crate::error::{FerraformError, StateError};
    use crate::provider::mock::MockProvider;
    use crate::provider::{ProviderClient, ResourceKind};
    use crate::state::LocalStateStore;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    fn domain_provider(creates: usize) -> ProviderSet {
        let mut client = MockProvider::new();
        client
            .expect_create_resource()
            .withf(|kind, _| *kind == ResourceKind::Domain)
            .times(creates)
            .returning(|_, payload| Ok(payload.clone()));
        let client: Arc<dyn ProviderClient> = Arc::new(client);
        ProviderSet::new("digitalocean").with_client("digitalocean", client)
    }

    fn desired() -> Vec<ResourceSpec> {
        vec![ResourceSpec::new(
            "example.com",
            "domain",
            props(json!({"ip_address": "203.0.113.10"})),
        )]
    }

    #[tokio::test]
    async fn test_deploy_records_history_and_releases_lock() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let providers = domain_provider(1);
        let reconciler = Reconciler::new(&store, &providers, &registry)
            .with_poll(PollConfig::new(Duration::from_millis(1), Duration::from_millis(50)));

        let result = reconciler.deploy(&desired()).await.expect("deploy");
        assert!(result.success);
        assert_eq!(result.count(OutcomeStatus::Created), 1);
        assert!(!store.is_locked().await.expect("lock state"));

        let state = reconciler.load_state().await.expect("load");
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.config_hash, result.config_hash);
        assert_eq!(state.resources[0].id_property("domain").as_deref(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_second_deploy_is_a_no_op() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let providers = domain_provider(1);
        let reconciler = Reconciler::new(&store, &providers, &registry);

        reconciler.deploy(&desired()).await.expect("first deploy");
        let plan = reconciler.plan(&desired()).await.expect("plan");
        assert!(!plan.has_changes());

        let result = reconciler.deploy(&desired()).await.expect("second deploy");
        assert_eq!(result.count(OutcomeStatus::Unchanged), 1);
    }

    #[tokio::test]
    async fn test_deploy_refuses_a_held_lock() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let providers = domain_provider(0);

        store.acquire_lock("someone-else", "deploy").await.expect("lock");
        let result = Reconciler::new(&store, &providers, &registry)
            .deploy(&desired())
            .await;

        assert!(matches!(
            result,
            Err(FerraformError::State(StateError::LockedByOther { .. }))
        ));
        assert!(store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_lock_is_renewed_between_resources() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let lock_path = temp.path().join("state.lock");
        let calls = Arc::new(AtomicUsize::new(0));
        let live_during_second = Arc::new(Mutex::new(None));

        let mut client = MockProvider::new();
        {
            let calls = Arc::clone(&calls);
            let live_during_second = Arc::clone(&live_during_second);
            client.expect_create_resource().times(2).returning(move |_, payload| {
                let content = std::fs::read_to_string(&lock_path).expect("lock file present");
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Let the lock lapse while the first resource is in flight.
                    let mut lock: Value = serde_json::from_str(&content).expect("lock json");
                    lock["expires_at"] = json!((chrono::Utc::now() - chrono::Duration::seconds(1)).to_rfc3339());
                    std::fs::write(&lock_path, lock.to_string()).expect("rewrite lock");
                } else {
                    let lock = LockInfo::decode(&content).expect("lock");
                    *live_during_second.lock().expect("mutex") = Some(!lock.is_expired());
                }
                Ok(payload.clone())
            });
        }
        let client: Arc<dyn ProviderClient> = Arc::new(client);
        let providers = ProviderSet::new("digitalocean").with_client("digitalocean", client);

        let desired = vec![
            ResourceSpec::new("example.com", "domain", Properties::new()),
            ResourceSpec::new("example.org", "domain", Properties::new()),
        ];
        let result = Reconciler::new(&store, &providers, &registry)
            .deploy(&desired)
            .await
            .expect("deploy");

        assert!(result.success);
        assert_eq!(*live_during_second.lock().expect("mutex"), Some(true));
        assert!(!store.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_destroy_of_empty_state() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let registry = HandlerRegistry::with_defaults();
        let providers = domain_provider(0);

        let result = Reconciler::new(&store, &providers, &registry)
            .destroy()
            .await
            .expect("destroy");
        assert!(result.success);
        assert!(result.outcomes.is_empty());
        assert_eq!(result.summary_line(), "Destroy finished: 0 destroyed, 0 skipped, 0 failed.");
    }
}
