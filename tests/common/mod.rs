//! Shared helpers for the end-to-end tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use ferraform::config::Properties;
use ferraform::error::{ProviderError, Result};
use ferraform::provider::{PollConfig, ProviderClient, ProviderSet, ResourceAction, ResourceKind, ResourceRef};

/// Provider that keeps objects in memory and records every call.
#[derive(Debug, Default)]
pub struct FakeProvider {
    next_id: AtomicU64,
    objects: Mutex<HashMap<String, Properties>>,
    calls: Mutex<Vec<String>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(100),
            ..Self::default()
        })
    }

    /// Makes deletes of `id` fail with a server error.
    pub fn fail_delete(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    /// Seeds an existing remote object.
    pub fn insert(&self, id: &str, properties: Value) {
        let Value::Object(map) = properties else {
            panic!("object expected");
        };
        self.objects.lock().unwrap().insert(id.to_string(), map);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that changed something remotely, reads excluded.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("read "))
            .collect()
    }

    pub fn object(&self, id: &str) -> Option<Properties> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn not_found(target: &ResourceRef) -> ferraform::error::FerraformError {
        ProviderError::NotFound {
            kind: target.kind.to_string(),
            id: target.id.clone(),
        }
        .into()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn name(&self) -> &'static str {
        "digitalocean"
    }

    async fn create_resource(&self, kind: ResourceKind, payload: &Properties) -> Result<Properties> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.record(format!("create {kind} {id}"));

        let mut observed = payload.clone();
        observed.insert("id".into(), json!(id));
        observed.insert("status".into(), json!("active"));
        self.objects.lock().unwrap().insert(id, observed.clone());
        Ok(observed)
    }

    async fn read_resource(&self, target: &ResourceRef) -> Result<Properties> {
        self.record(format!("read {target}"));
        self.object(&target.id).ok_or_else(|| Self::not_found(target))
    }

    async fn update_resource(&self, target: &ResourceRef, changes: &Properties) -> Result<Properties> {
        self.record(format!("update {target}"));
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(&target.id).ok_or_else(|| Self::not_found(target))?;
        object.extend(changes.clone());
        Ok(object.clone())
    }

    async fn delete_resource(&self, target: &ResourceRef) -> Result<()> {
        self.record(format!("delete {target}"));
        if self.failing_deletes.lock().unwrap().contains(&target.id) {
            return Err(ProviderError::api_error("digitalocean", 500, "internal error").into());
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&target.id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(target))
    }

    async fn perform(&self, target: &ResourceRef, action: &ResourceAction) -> Result<()> {
        self.record(format!("perform {} {target}", action.name()));
        if let ResourceAction::Resize { size } = action
            && let Some(object) = self.objects.lock().unwrap().get_mut(&target.id)
        {
            object.insert("size".into(), json!(size));
        }
        Ok(())
    }

    async fn resolve_ssh_key(&self, key: &str) -> Result<Option<Value>> {
        Ok(Some(json!(key)))
    }
}

/// Provider set whose default `digitalocean` client is `fake`.
pub fn providers(fake: &Arc<FakeProvider>) -> ProviderSet {
    ProviderSet::new("digitalocean").with_client("digitalocean", fake.clone())
}

/// Polling that never waits long.
pub fn fast_poll() -> PollConfig {
    PollConfig::new(Duration::from_millis(1), Duration::from_millis(200))
}
