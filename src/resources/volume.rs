//! Block storage volumes.
//!
//! Volumes can only grow. `attach_to` names a droplet declared in the same
//! configuration; the attachment is resolved through recorded state.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Properties, ResourceSpec};
use crate::error::{ConfigError, FerraformError, ProviderError, Result};
use crate::planner::{DiffDetail, scalar_diff};
use crate::provider::{ResourceAction, ResourceKind, ResourceRef, observed_id};
use crate::state::ResourceRecord;

use super::handler::{
    CreateOutcome, HandlerContext, ListSteps, ResourceHandler, TypedDiff, UpdateOutcome,
    delete_ignoring_missing, list_property, payload_from, rename_id,
};

/// Accepted spellings of the size property, in GiB.
const SIZE_KEYS: &[&str] = &["size", "size_gb", "size_gigabytes"];

/// Statuses of a volume ready for use.
const READY: &[&str] = &["active", "available"];

/// Observed key holding the attached droplet.
const ATTACHED: &str = "attached_droplet_id";

/// Handler for block storage volumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeHandler;

/// Returns the first size key present and its value.
fn size_of(properties: &Properties) -> Option<(&'static str, u64)> {
    SIZE_KEYS.iter().find_map(|key| {
        let value = properties.get(*key)?;
        let size = value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))?;
        Some((*key, size))
    })
}

fn region_of(properties: &Properties) -> Option<String> {
    properties
        .get("region")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl VolumeHandler {
    /// Resolves the droplet name and attaches the volume to it.
    async fn attach(
        ctx: &HandlerContext<'_>,
        target: &ResourceRef,
        droplet: &str,
        region: Option<String>,
    ) -> Result<String> {
        let droplet_id = ctx.resolve_id(droplet, ResourceKind::Droplet)?;
        ctx.client
            .perform(
                target,
                &ResourceAction::Attach {
                    target_id: droplet_id.clone(),
                    region,
                },
            )
            .await?;
        Ok(droplet_id)
    }

    /// Moves the attachment. Returns the new attached droplet, or null when
    /// the volume ends up detached.
    async fn reattach(
        ctx: &HandlerContext<'_>,
        target: &ResourceRef,
        record: &ResourceRecord,
        desired: Option<&str>,
    ) -> Result<Value> {
        let region = region_of(&record.properties);
        if let Some(current) = record.id_property(ATTACHED) {
            ctx.client
                .perform(
                    target,
                    &ResourceAction::Detach {
                        target_id: current,
                        region: region.clone(),
                    },
                )
                .await?;
        }

        match desired {
            Some(droplet) => Ok(Value::String(
                Self::attach(ctx, target, droplet, region).await?,
            )),
            None => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl ResourceHandler for VolumeHandler {
    fn type_name(&self) -> &'static str {
        "volume"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["block", "block_storage", "vultr_volume"]
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    fn id_key(&self) -> &'static str {
        "volume_id"
    }

    fn computed_keys(&self) -> &'static [&'static str] {
        &[ATTACHED]
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["region"]
    }

    fn references(&self, properties: &Properties) -> Vec<String> {
        properties
            .get("attach_to")
            .and_then(Value::as_str)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default()
    }

    fn diff(&self, desired: &ResourceSpec, recorded: &ResourceRecord) -> TypedDiff {
        let mut typed = TypedDiff {
            handled: vec!["size", "size_gb", "size_gigabytes", "attach_to"],
            ..TypedDiff::default()
        };

        if let Some((key, size)) = size_of(&desired.properties) {
            let recorded_size = size_of(&recorded.properties).map(|(_, s)| s);
            if recorded_size != Some(size) {
                let mut detail = DiffDetail::changed(
                    key,
                    recorded_size.map(Value::from).as_ref(),
                    &Value::from(size),
                );
                if recorded_size.is_some_and(|old| size < old) {
                    detail = detail.with_hint("volumes can only grow");
                }
                typed.details.push(detail);
            }
        }

        if let Some(attach_to) = desired.property("attach_to")
            && let Some(detail) = scalar_diff("attach_to", attach_to, recorded.property("attach_to"))
        {
            typed.details.push(detail);
        }

        typed
    }

    async fn create(&self, ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<CreateOutcome> {
        let Some((_, size)) = size_of(&spec.properties) else {
            return Err(ConfigError::MissingProperty {
                resource: spec.name.clone(),
                property: "size".to_string(),
            }
            .into());
        };

        let mut payload = payload_from(
            &spec.properties,
            &["region", "description", "filesystem_type", "filesystem_label", "tags"],
        );
        payload.insert("name".into(), Value::String(spec.name.clone()));
        payload.insert("size".into(), Value::from(size));

        let mut observed = ctx.client.create_resource(ResourceKind::Volume, &payload).await?;
        let id = observed_id(&observed).ok_or_else(|| {
            FerraformError::Provider(ProviderError::invalid_response(
                ctx.client.name(),
                "created volume has no id",
            ))
        })?;
        let target = ResourceRef::new(ResourceKind::Volume, id.as_str());
        info!("Created volume '{}' ({id}, {size} GiB)", spec.name);

        let pending = observed
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|status| !READY.contains(&status));
        if pending {
            observed.extend(ctx.wait_for_status(&target, READY).await?);
        }

        let mut unapplied = Vec::new();
        if let Some(droplet) = spec.str_property("attach_to") {
            match Self::attach(ctx, &target, droplet, region_of(&spec.properties)).await {
                Ok(droplet_id) => {
                    info!("Attached volume '{}' to '{droplet}'", spec.name);
                    observed.insert(ATTACHED.into(), Value::String(droplet_id));
                }
                Err(e) => {
                    warn!("Failed to attach volume '{}' to '{droplet}': {e}", spec.name);
                    unapplied.push(("attach_to".to_string(), e.to_string()));
                }
            }
        }

        Ok(CreateOutcome {
            observed: rename_id(observed, self.id_key()),
            unapplied,
        })
    }

    async fn update(
        &self,
        ctx: &HandlerContext<'_>,
        record: &ResourceRecord,
        spec: &ResourceSpec,
        changes: &[DiffDetail],
    ) -> Result<UpdateOutcome> {
        let target = self.target(record)?;
        let mut outcome = UpdateOutcome::default();

        for change in changes {
            let field = change.field.as_str();
            if SIZE_KEYS.contains(&field) {
                let new = change.new_value().and_then(Value::as_u64);
                let old = size_of(&record.properties).map(|(_, s)| s);
                match (new, old) {
                    (Some(new), Some(old)) if new < old => {
                        warn!(
                            "Volume '{}' cannot shrink from {old} to {new} GiB, leaving as-is",
                            record.name
                        );
                        outcome.unsupported(field);
                    }
                    (Some(new), _) => {
                        let action = ResourceAction::ResizeVolume {
                            size_gb: new,
                            region: region_of(&record.properties),
                        };
                        ctx.perform_for(&mut outcome, field, &target, &[action]).await;
                    }
                    (None, _) => outcome.unsupported(field),
                }
                continue;
            }

            match field {
                "attach_to" => {
                    let desired = spec.str_property("attach_to");
                    match Self::reattach(ctx, &target, record, desired).await {
                        Ok(attached) => {
                            outcome.observed.insert(ATTACHED.into(), attached);
                            outcome.applied.push(field.to_string());
                        }
                        Err(e) => outcome.failed.push((field.to_string(), e.to_string())),
                    }
                }
                "tags" => {
                    if let Some((added, removed)) = change.list_delta() {
                        let recorded = list_property(&record.properties, field);
                        ctx.perform_list_delta(&mut outcome, field, &target, recorded, ListSteps::tags(added, removed))
                            .await;
                    } else {
                        outcome.unsupported(field);
                    }
                }
                _ => outcome.unsupported(field),
            }
        }

        Ok(outcome)
    }

    async fn delete(&self, ctx: &HandlerContext<'_>, record: &ResourceRecord) -> Result<()> {
        let target = self.target(record)?;

        if let Some(droplet_id) = record.id_property(ATTACHED) {
            let detach = ResourceAction::Detach {
                target_id: droplet_id,
                region: region_of(&record.properties),
            };
            if let Err(e) = ctx.client.perform(&target, &detach).await {
                warn!("Detaching volume '{}' failed, deleting anyway: {e}", record.name);
            }
        }

        delete_ignoring_missing(ctx.client, &target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PollConfig;
    use crate::provider::mock::MockProvider;
    use crate::resources::HandlerRegistry;
    use crate::state::State;
    use serde_json::json;
    use std::time::Duration;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    fn state_with_droplet() -> State {
        let mut state = State::new();
        state.upsert(ResourceRecord::from_spec(
            &ResourceSpec::new("inst1", "droplet", Properties::new()),
            "digitalocean",
            props(json!({"droplet_id": 77})),
        ));
        state
    }

    #[test]
    fn test_shrink_gets_hint() {
        let recorded = ResourceRecord::from_spec(
            &ResourceSpec::new("data", "volume", props(json!({"size": 100}))),
            "digitalocean",
            Properties::new(),
        );
        let desired = ResourceSpec::new("data", "volume", props(json!({"size_gb": 50})));

        let typed = VolumeHandler.diff(&desired, &recorded);
        assert_eq!(typed.details.len(), 1);
        assert_eq!(
            typed.details[0].to_string(),
            "size_gb: 100 -> 50 (volumes can only grow)"
        );
    }

    #[tokio::test]
    async fn test_create_attaches_by_name() {
        let registry = HandlerRegistry::with_defaults();
        let state = state_with_droplet();
        let mut client = MockProvider::new();
        client
            .expect_create_resource()
            .withf(|kind, payload| *kind == ResourceKind::Volume && payload.get("size") == Some(&json!(10)))
            .returning(|_, _| Ok(props(json!({"id": "vol-1"}))));
        client
            .expect_perform()
            .withf(|target, action| {
                target.id == "vol-1"
                    && *action
                        == ResourceAction::Attach {
                            target_id: "77".to_string(),
                            region: Some("nyc3".to_string()),
                        }
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let spec = ResourceSpec::new(
            "volA",
            "volume",
            props(json!({"region": "nyc3", "size_gb": 10, "attach_to": "inst1"})),
        );
        let ctx = HandlerContext::new(&client, &registry, &state, fast());
        let outcome = VolumeHandler.create(&ctx, &spec).await.expect("create");

        assert_eq!(outcome.observed.get("volume_id"), Some(&json!("vol-1")));
        assert_eq!(outcome.observed.get(ATTACHED), Some(&json!("77")));
        assert!(outcome.unapplied.is_empty());
    }

    #[tokio::test]
    async fn test_failed_attach_is_unapplied() {
        let registry = HandlerRegistry::with_defaults();
        let state = State::new();
        let mut client = MockProvider::new();
        client
            .expect_create_resource()
            .returning(|_, _| Ok(props(json!({"id": "vol-1"}))));

        let spec = ResourceSpec::new(
            "volA",
            "volume",
            props(json!({"region": "nyc3", "size": 10, "attach_to": "ghost"})),
        );
        let ctx = HandlerContext::new(&client, &registry, &state, fast());
        let outcome = VolumeHandler.create(&ctx, &spec).await.expect("create");

        assert_eq!(outcome.unapplied.len(), 1);
        assert_eq!(outcome.unapplied[0].0, "attach_to");
    }

    #[tokio::test]
    async fn test_delete_detaches_first() {
        let registry = HandlerRegistry::with_defaults();
        let state = State::new();
        let mut client = MockProvider::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_perform()
            .withf(|_, action| matches!(action, ResourceAction::Detach { target_id, .. } if target_id == "77"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ProviderError::api_error("digitalocean", 422, "not attached").into()));
        client
            .expect_delete_resource()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let record = ResourceRecord::from_spec(
            &ResourceSpec::new("volA", "volume", props(json!({"region": "nyc3"}))),
            "digitalocean",
            props(json!({"volume_id": "vol-1", "attached_droplet_id": "77"})),
        );
        let ctx = HandlerContext::new(&client, &registry, &state, fast());
        VolumeHandler
            .delete(&ctx, &record)
            .await
            .expect("detach failure does not block delete");
    }

    #[tokio::test]
    async fn test_shrink_is_unsupported() {
        let registry = HandlerRegistry::with_defaults();
        let state = State::new();
        let client = MockProvider::new();
        let record = ResourceRecord::from_spec(
            &ResourceSpec::new("data", "volume", props(json!({"size": 100}))),
            "digitalocean",
            props(json!({"volume_id": "vol-1"})),
        );
        let spec = ResourceSpec::new("data", "volume", props(json!({"size": 50})));
        let changes = VolumeHandler.diff(&spec, &record).details;

        let ctx = HandlerContext::new(&client, &registry, &state, fast());
        let outcome = VolumeHandler
            .update(&ctx, &record, &spec, &changes)
            .await
            .expect("update runs");
        assert_eq!(outcome.unsupported, vec!["size".to_string()]);
    }
}
