//! Records inside a DNS zone.
//!
//! The `domain` property names either a domain resource from the same
//! configuration or an existing zone. The resolved zone is recorded so a
//! later destroy does not depend on the domain resource still existing.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::{Properties, ResourceSpec};
use crate::error::{ReconcileError, Result};
use crate::planner::DiffDetail;
use crate::provider::{ResourceKind, ResourceRef};
use crate::state::ResourceRecord;

use super::handler::{
    CreateOutcome, HandlerContext, ResourceHandler, UpdateOutcome, delete_ignoring_missing,
    payload_from, rename_id,
};

/// Fields the provider can change on an existing record.
const MUTABLE: &[&str] = &["data", "ttl", "priority", "port", "weight"];

/// Observed key holding the resolved zone.
const ZONE: &str = "zone";

/// Handler for DNS records.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsRecordHandler;

/// Resolves a domain reference to the zone name.
fn resolve_zone(ctx: &HandlerContext<'_>, domain: &str) -> String {
    ctx.resolve_id(domain, ResourceKind::Domain)
        .unwrap_or_else(|_| domain.to_string())
}

#[async_trait]
impl ResourceHandler for DnsRecordHandler {
    fn type_name(&self) -> &'static str {
        "dns_record"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["record", "vultr_dns_record"]
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::DnsRecord
    }

    fn id_key(&self) -> &'static str {
        "record_id"
    }

    fn computed_keys(&self) -> &'static [&'static str] {
        &[ZONE]
    }

    fn required_properties(&self) -> &'static [&'static str] {
        &["domain", "type", "data"]
    }

    fn references(&self, properties: &Properties) -> Vec<String> {
        properties
            .get("domain")
            .and_then(Value::as_str)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default()
    }

    async fn create(&self, ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<CreateOutcome> {
        let domain = spec.str_property("domain").unwrap_or_default();
        let zone = resolve_zone(ctx, domain);

        let mut payload = payload_from(
            &spec.properties,
            &["type", "name", "data", "ttl", "priority", "port", "weight", "flags", "tag"],
        );
        payload
            .entry("name")
            .or_insert_with(|| Value::String("@".to_string()));
        payload.insert("domain".into(), Value::String(zone.clone()));

        let observed = ctx.client.create_resource(ResourceKind::DnsRecord, &payload).await?;
        info!("Created DNS record '{}' in '{zone}'", spec.name);

        let mut observed = rename_id(observed, self.id_key());
        observed.insert(ZONE.into(), Value::String(zone));
        Ok(CreateOutcome {
            observed,
            unapplied: Vec::new(),
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
        let mut patch = Properties::new();

        for change in changes {
            match change.new_value() {
                Some(value) if MUTABLE.contains(&change.field.as_str()) => {
                    patch.insert(change.field.clone(), value.clone());
                }
                _ => outcome.unsupported(&change.field),
            }
        }

        if !patch.is_empty() {
            match ctx.client.update_resource(&target, &patch).await {
                Ok(observed) => {
                    outcome.applied.extend(patch.keys().cloned());
                    outcome.observed = rename_id(observed, self.id_key());
                }
                Err(e) => {
                    let message = e.to_string();
                    outcome
                        .failed
                        .extend(patch.keys().map(|key| (key.clone(), message.clone())));
                }
            }
        }

        Ok(outcome)
    }

    async fn delete(&self, ctx: &HandlerContext<'_>, record: &ResourceRecord) -> Result<()> {
        let target = self.target(record)?;
        delete_ignoring_missing(ctx.client, &target).await
    }

    fn target(&self, record: &ResourceRecord) -> Result<ResourceRef> {
        let id = self
            .identifier(record)
            .ok_or_else(|| ReconcileError::MissingIdentifier {
                resource_type: record.resource_type.clone(),
                name: record.name.clone(),
                key: self.id_key().to_string(),
            })?;
        let zone = record
            .property(ZONE)
            .or_else(|| record.property("domain"))
            .and_then(Value::as_str)
            .ok_or_else(|| ReconcileError::MissingIdentifier {
                resource_type: record.resource_type.clone(),
                name: record.name.clone(),
                key: "domain".to_string(),
            })?;
        Ok(ResourceRef::new(ResourceKind::DnsRecord, id).with_parent(zone))
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

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    fn www() -> ResourceSpec {
        ResourceSpec::new(
            "www",
            "dns_record",
            props(json!({"domain": "site", "type": "A", "name": "www", "data": "1.2.3.4", "ttl": 300})),
        )
    }

    #[tokio::test]
    async fn test_create_resolves_domain_resource() {
        let registry = HandlerRegistry::with_defaults();
        let mut state = State::new();
        state.upsert(ResourceRecord::from_spec(
            &ResourceSpec::new("site", "domain", Properties::new()),
            "digitalocean",
            props(json!({"domain": "example.com"})),
        ));
        let mut client = MockProvider::new();
        client
            .expect_create_resource()
            .withf(|kind, payload| {
                *kind == ResourceKind::DnsRecord && payload.get("domain") == Some(&json!("example.com"))
            })
            .returning(|_, _| Ok(props(json!({"id": 28448433}))));

        let ctx = HandlerContext::new(&client, &registry, &state, PollConfig::default());
        let outcome = DnsRecordHandler.create(&ctx, &www()).await.expect("create");
        assert_eq!(outcome.observed.get("record_id"), Some(&json!(28448433)));
        assert_eq!(outcome.observed.get(ZONE), Some(&json!("example.com")));
    }

    #[tokio::test]
    async fn test_update_patches_data_and_ttl() {
        let registry = HandlerRegistry::with_defaults();
        let state = State::new();
        let mut client = MockProvider::new();
        client
            .expect_update_resource()
            .withf(|target, changes| {
                target.parent.as_deref() == Some("example.com")
                    && changes.get("data") == Some(&json!("5.6.7.8"))
                    && changes.get("ttl") == Some(&json!(60))
            })
            .times(1)
            .returning(|_, _| Ok(Properties::new()));

        let record = ResourceRecord::from_spec(
            &www(),
            "digitalocean",
            props(json!({"record_id": 1, "zone": "example.com"})),
        );
        let changes = vec![
            DiffDetail::changed("data", Some(&json!("1.2.3.4")), &json!("5.6.7.8")),
            DiffDetail::changed("ttl", Some(&json!(300)), &json!(60)),
            DiffDetail::changed("type", Some(&json!("A")), &json!("AAAA")),
        ];

        let ctx = HandlerContext::new(&client, &registry, &state, PollConfig::default());
        let outcome = DnsRecordHandler
            .update(&ctx, &record, &www(), &changes)
            .await
            .expect("update");
        assert_eq!(outcome.applied, vec!["data".to_string(), "ttl".to_string()]);
        assert_eq!(outcome.unsupported, vec!["type".to_string()]);
    }

    #[test]
    fn test_target_needs_zone() {
        let record = ResourceRecord::from_spec(
            &ResourceSpec::new("www", "dns_record", Properties::new()),
            "digitalocean",
            props(json!({"record_id": 1})),
        );
        assert!(DnsRecordHandler.target(&record).is_err());
    }
}
