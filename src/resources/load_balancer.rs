//! Load balancers.

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

/// Observed key holding the member droplet ids.
const RESOLVED: &str = "resolved_droplet_ids";

/// Handler for load balancers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancerHandler;

#[async_trait]
impl ResourceHandler for LoadBalancerHandler {
    fn type_name(&self) -> &'static str {
        "load_balancer"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["loadbalancer", "lb", "vultr_load_balancer"]
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    fn id_key(&self) -> &'static str {
        "load_balancer_id"
    }

    fn computed_keys(&self) -> &'static [&'static str] {
        &[RESOLVED]
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["region", "forwarding_rules"]
    }

    fn references(&self, properties: &Properties) -> Vec<String> {
        string_items(&list_property(properties, "droplets"))
    }

    async fn create(&self, ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<CreateOutcome> {
        let mut payload = payload_from(
            &spec.properties,
            &[
                "region",
                "size",
                "forwarding_rules",
                "health_check",
                "sticky_sessions",
                "redirect_http_to_https",
                "tag",
                "vpc_uuid",
            ],
        );
        payload.insert("name".into(), Value::String(spec.name.clone()));

        let mut unapplied = Vec::new();
        let mut members = Vec::new();
        match ctx.resolve_ids(&list_property(&spec.properties, "droplets"), ResourceKind::Droplet) {
            Ok(ids) => members = ids,
            Err(e) => {
                warn!("Load balancer '{}' created without its droplets: {e}", spec.name);
                unapplied.push(("droplets".to_string(), e.to_string()));
            }
        }
        if !members.is_empty() {
            payload.insert(
                "droplet_ids".into(),
                Value::Array(members.iter().map(|id| id_value(id)).collect()),
            );
        }

        let observed = ctx
            .client
            .create_resource(ResourceKind::LoadBalancer, &payload)
            .await?;
        info!("Created load balancer '{}'", spec.name);

        let mut observed = rename_id(observed, self.id_key());
        observed.insert(
            RESOLVED.into(),
            Value::Array(members.into_iter().map(Value::String).collect()),
        );
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
            match (field, change.list_delta()) {
                ("forwarding_rules", Some((added, removed))) => {
                    let recorded = list_property(&record.properties, field);
                    let steps = ListSteps::rules(field, added, removed);
                    ctx.perform_list_delta(&mut outcome, field, &target, recorded, steps).await;
                }
                ("droplets", Some(delta)) => {
                    sync_droplets(ctx, &mut outcome, &target, record, RESOLVED, delta).await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::FieldChange;
    use crate::provider::{PollConfig, ResourceAction};
    use crate::provider::mock::MockProvider;
    use crate::resources::HandlerRegistry;
    use crate::state::State;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    fn http_rule(port: u16) -> Value {
        json!({"entry_protocol": "http", "entry_port": port, "target_protocol": "http", "target_port": 8080})
    }

    #[tokio::test]
    async fn test_droplet_membership_sync() {
        let registry = HandlerRegistry::with_defaults();
        let mut state = State::new();
        for (name, id) in [("web1", 1), ("web2", 2)] {
            state.upsert(ResourceRecord::from_spec(
                &ResourceSpec::new(name, "droplet", Properties::new()),
                "digitalocean",
                props(json!({"droplet_id": id})),
            ));
        }
        let mut client = MockProvider::new();
        client
            .expect_perform()
            .withf(|_, action| matches!(action, ResourceAction::Attach { target_id, .. } if target_id == "2"))
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_perform()
            .withf(|_, action| matches!(action, ResourceAction::Detach { target_id, .. } if target_id == "1"))
            .times(1)
            .returning(|_, _| Ok(()));

        let record = ResourceRecord::from_spec(
            &ResourceSpec::new("lb", "load_balancer", props(json!({"droplets": ["web1"]}))),
            "digitalocean",
            props(json!({"load_balancer_id": "lb-1", "resolved_droplet_ids": ["1"]})),
        );
        let changes = vec![DiffDetail {
            field: "droplets".to_string(),
            change: FieldChange::ListDelta {
                added: vec![json!("web2")],
                removed: vec![json!("web1")],
            },
        }];

        let ctx = HandlerContext::new(&client, &registry, &state, PollConfig::default());
        let spec = ResourceSpec::new("lb", "load_balancer", props(json!({"droplets": ["web2"]})));
        let outcome = LoadBalancerHandler
            .update(&ctx, &record, &spec, &changes)
            .await
            .expect("update");

        assert_eq!(outcome.applied, vec!["droplets".to_string()]);
        assert_eq!(outcome.observed.get(RESOLVED), Some(&json!(["2"])));
    }

    #[tokio::test]
    async fn test_forwarding_rule_removal() {
        let registry = HandlerRegistry::with_defaults();
        let state = State::new();
        let mut client = MockProvider::new();
        client
            .expect_perform()
            .withf(|_, action| matches!(action, ResourceAction::RemoveRules { rules, .. } if rules.len() == 1))
            .times(1)
            .returning(|_, _| Ok(()));

        let record = ResourceRecord::from_spec(
            &ResourceSpec::new("lb", "load_balancer", props(json!({"forwarding_rules": [http_rule(80), http_rule(81)]}))),
            "digitalocean",
            props(json!({"load_balancer_id": "lb-1"})),
        );
        let spec = ResourceSpec::new("lb", "load_balancer", props(json!({"forwarding_rules": [http_rule(80)]})));
        let changes = vec![DiffDetail {
            field: "forwarding_rules".to_string(),
            change: FieldChange::ListDelta {
                added: Vec::new(),
                removed: vec![http_rule(81)],
            },
        }];

        let ctx = HandlerContext::new(&client, &registry, &state, PollConfig::default());
        let outcome = LoadBalancerHandler
            .update(&ctx, &record, &spec, &changes)
            .await
            .expect("update");
        assert_eq!(outcome.applied, vec!["forwarding_rules".to_string()]);
    }
}
