//! Virtual machines (DigitalOcean droplets, Vultr instances).
//!
//! A resize needs the machine powered off; the handler always attempts to
//! power it back on, even when the resize itself fails.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Properties, ResourceSpec};
use crate::error::{FerraformError, ProviderError, Result};
use crate::planner::{DiffDetail, scalar_diff};
use crate::provider::{ResourceAction, ResourceKind, ResourceRef, observed_id};
use crate::state::ResourceRecord;

use super::handler::{
    CreateOutcome, HandlerContext, ListSteps, ResourceHandler, TypedDiff, UpdateOutcome,
    delete_ignoring_missing, list_property, payload_from, rename_id,
};

/// Status a machine reports once it is running.
const READY: &[&str] = &["active"];

/// Recorded backups value when the record has none.
static BACKUPS_OFF: Value = Value::Bool(false);

/// Properties forwarded to the provider on create.
const CREATE_KEYS: &[&str] = &[
    "region",
    "size",
    "image",
    "backups",
    "ipv6",
    "monitoring",
    "tags",
    "user_data",
    "vpc_uuid",
];

/// Handler for droplets and instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropletHandler;

impl DropletHandler {
    /// Resolves configured SSH key names to ids, dropping unknown keys.
    async fn resolve_ssh_keys(ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<Vec<Value>> {
        let Some(keys) = spec.property("ssh_keys").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            let key = match key {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match ctx.client.resolve_ssh_key(&key).await? {
                Some(id) => resolved.push(id),
                None => warn!("SSH key '{key}' not found for droplet '{}', skipping", spec.name),
            }
        }
        Ok(resolved)
    }

    /// Power off, resize, power on, then wait until the machine is back.
    async fn resize(ctx: &HandlerContext<'_>, target: &ResourceRef, size: &str) -> Result<Properties> {
        ctx.client.perform(target, &ResourceAction::PowerOff).await?;

        let resized = ctx
            .client
            .perform(
                target,
                &ResourceAction::Resize {
                    size: size.to_string(),
                },
            )
            .await;
        let powered_on = ctx.client.perform(target, &ResourceAction::PowerOn).await;

        resized?;
        powered_on?;
        ctx.wait_for_status(target, READY).await
    }
}

#[async_trait]
impl ResourceHandler for DropletHandler {
    fn type_name(&self) -> &'static str {
        "droplet"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["instance", "vm", "vultr_instance"]
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Droplet
    }

    fn id_key(&self) -> &'static str {
        "droplet_id"
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["region", "size", "image"]
    }

    fn diff(&self, desired: &ResourceSpec, recorded: &ResourceRecord) -> TypedDiff {
        let mut typed = TypedDiff {
            handled: vec!["size", "backups"],
            ..TypedDiff::default()
        };

        if let Some(size) = desired.property("size")
            && let Some(detail) = scalar_diff("size", size, recorded.property("size"))
        {
            typed
                .details
                .push(detail.with_hint("resize requires a power cycle"));
        }

        if let Some(backups) = desired.property("backups") {
            let recorded_backups = recorded.property("backups").unwrap_or(&BACKUPS_OFF);
            if let Some(detail) = scalar_diff("backups", backups, Some(recorded_backups)) {
                typed.details.push(detail);
            }
        }

        typed
    }

    async fn create(&self, ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<CreateOutcome> {
        let mut payload = payload_from(&spec.properties, CREATE_KEYS);
        payload.insert("name".into(), Value::String(spec.name.clone()));
        let ssh_keys = Self::resolve_ssh_keys(ctx, spec).await?;
        if !ssh_keys.is_empty() {
            payload.insert("ssh_keys".into(), Value::Array(ssh_keys));
        }

        let created = ctx.client.create_resource(ResourceKind::Droplet, &payload).await?;
        let id = observed_id(&created).ok_or_else(|| {
            FerraformError::Provider(ProviderError::invalid_response(
                ctx.client.name(),
                "created droplet has no id",
            ))
        })?;
        info!("Created droplet '{}' ({id}), waiting for it to become active", spec.name);

        let target = ResourceRef::new(ResourceKind::Droplet, id.as_str());
        let mut observed = created;
        let mut unapplied = Vec::new();
        match ctx.wait_for_status(&target, READY).await {
            Ok(active) => observed.extend(active),
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                // The droplet exists, so it must be recorded.
                warn!("Droplet '{}' ({id}) did not become active, recording it anyway: {e}", spec.name);
                unapplied.push(("status".to_string(), format!("did not become active: {e}")));
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
        _spec: &ResourceSpec,
        changes: &[DiffDetail],
    ) -> Result<UpdateOutcome> {
        let target = self.target(record)?;
        let mut outcome = UpdateOutcome::default();

        for change in changes {
            match (change.field.as_str(), change.new_value(), change.list_delta()) {
                ("size", Some(Value::String(size)), _) => {
                    match Self::resize(ctx, &target, size).await {
                        Ok(observed) => {
                            outcome.observed.extend(rename_id(observed, self.id_key()));
                            outcome.applied.push(change.field.clone());
                        }
                        Err(e) => outcome.failed.push((change.field.clone(), e.to_string())),
                    }
                }
                ("backups", Some(Value::Bool(enabled)), _) => {
                    let action = if *enabled {
                        ResourceAction::EnableFeature("backups".to_string())
                    } else {
                        ResourceAction::DisableFeature("backups".to_string())
                    };
                    ctx.perform_for(&mut outcome, "backups", &target, &[action])
                        .await;
                }
                ("tags", _, Some((added, removed))) => {
                    let recorded = list_property(&record.properties, "tags");
                    ctx.perform_list_delta(&mut outcome, "tags", &target, recorded, ListSteps::tags(added, removed))
                        .await;
                }
                (field, _, _) => outcome.unsupported(field),
            }
        }

        Ok(outcome)
    }

    async fn delete(&self, ctx: &HandlerContext<'_>, record: &ResourceRecord) -> Result<()> {
        let target = self.target(record)?;
        delete_ignoring_missing(ctx.client, &target).await
    }
}
