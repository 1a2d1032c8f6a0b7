//! Cloud firewalls (DigitalOcean firewalls, Vultr firewall groups).
//!
//! Rules, tags and droplet membership are sets; changes are applied as
//! add/remove operations for the delta only.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Properties, ResourceSpec};
use crate::error::Result;
use crate::planner::DiffDetail;
use crate::provider::{ResourceKind, id_value};
use crate::state::ResourceRecord;

use super::handler::{
    CreateOutcome, HandlerContext, ListSteps, ResourceHandler, UpdateOutcome,
    delete_ignoring_missing, list_property, payload_from, rename_id, string_items, sync_droplets,
};

/// Rule list properties.
const RULE_FIELDS: &[&str] = &["inbound_rules", "outbound_rules"];

/// Observed key holding the droplet ids the firewall applies to.
const RESOLVED: &str = "resolved_droplet_ids";

/// Handler for firewalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirewallHandler;

#[async_trait]
impl ResourceHandler for FirewallHandler {
    fn type_name(&self) -> &'static str {
        "firewall"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["firewall_group", "vultr_firewall"]
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Firewall
    }

    fn id_key(&self) -> &'static str {
        "firewall_id"
    }

    fn computed_keys(&self) -> &'static [&'static str] {
        &[RESOLVED]
    }

    fn references(&self, properties: &Properties) -> Vec<String> {
        string_items(&list_property(properties, "droplets"))
    }

    async fn create(&self, ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<CreateOutcome> {
        let mut payload = payload_from(&spec.properties, &["inbound_rules", "outbound_rules", "tags"]);
        payload.insert("name".into(), Value::String(spec.name.clone()));

        let mut unapplied = Vec::new();
        let mut droplet_ids: Vec<Value> = spec
            .property("droplet_ids")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        match ctx.resolve_ids(&list_property(&spec.properties, "droplets"), ResourceKind::Droplet) {
            Ok(ids) => droplet_ids.extend(ids.iter().map(|id| id_value(id))),
            Err(e) => {
                warn!("Firewall '{}' created without its droplets: {e}", spec.name);
                unapplied.push(("droplets".to_string(), e.to_string()));
            }
        }
        if !droplet_ids.is_empty() {
            payload.insert("droplet_ids".into(), Value::Array(droplet_ids.clone()));
        }

        let observed = ctx.client.create_resource(ResourceKind::Firewall, &payload).await?;
        info!("Created firewall '{}'", spec.name);

        let mut observed = rename_id(observed, self.id_key());
        let resolved: Vec<Value> = droplet_ids
            .iter()
            .map(|id| match id {
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            })
            .collect();
        observed.insert(RESOLVED.into(), Value::Array(resolved));
        Ok(CreateOutcome { observed, unapplied })
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
            let field = change.field.as_str();
            let Some((added, removed)) = change.list_delta() else {
                outcome.unsupported(field);
                continue;
            };

            if RULE_FIELDS.contains(&field) {
                let recorded = list_property(&record.properties, field);
                let steps = ListSteps::rules(field, added, removed);
                ctx.perform_list_delta(&mut outcome, field, &target, recorded, steps).await;
                continue;
            }

            match field {
                "tags" => {
                    let recorded = list_property(&record.properties, field);
                    ctx.perform_list_delta(&mut outcome, field, &target, recorded, ListSteps::tags(added, removed))
                        .await;
                }
                "droplets" => {
                    sync_droplets(ctx, &mut outcome, &target, record, RESOLVED, (added, removed)).await;
                }
                _ => outcome.unsupported(field),
            }
        }

        Ok(outcome)
    }

    async fn delete(&self, ctx: &HandlerContext<'_>, record: &ResourceRecord) -> Result<()> {
        let target = self.target(record)?;
        delete_ignoring_missing(ctx.client, &target).await
    }
}
