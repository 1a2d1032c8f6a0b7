//! DNS zones.
//!
//! A domain's identifier is its name. The resource name doubles as the
//! domain name unless a `domain` property says otherwise.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::{Properties, ResourceSpec};
use crate::error::Result;
use crate::planner::scalar_diff;
use crate::provider::{ResourceKind, observed_id};
use crate::state::ResourceRecord;

use super::handler::{CreateOutcome, HandlerContext, ResourceHandler, TypedDiff, delete_ignoring_missing};

/// Handler for DNS zones.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainHandler;

/// The domain name a resource asks for.
fn domain_name(spec: &ResourceSpec) -> &str {
    spec.str_property("domain").unwrap_or(&spec.name)
}

#[async_trait]
impl ResourceHandler for DomainHandler {
    fn type_name(&self) -> &'static str {
        "domain"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["vultr_domain", "dns_zone"]
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Domain
    }

    fn id_key(&self) -> &'static str {
        "domain"
    }

    fn diff(&self, desired: &ResourceSpec, recorded: &ResourceRecord) -> TypedDiff {
        let wanted = Value::String(domain_name(desired).to_string());
        TypedDiff {
            details: scalar_diff("domain", &wanted, recorded.property("domain"))
                .into_iter()
                .collect(),
            handled: vec!["domain"],
        }
    }

    async fn create(&self, ctx: &HandlerContext<'_>, spec: &ResourceSpec) -> Result<CreateOutcome> {
        let name = domain_name(spec);
        let mut payload = Properties::new();
        payload.insert("name".into(), Value::String(name.to_string()));
        if let Some(ip) = spec.property("ip_address").or_else(|| spec.property("ip")) {
            payload.insert("ip_address".into(), ip.clone());
        }

        let mut observed = ctx.client.create_resource(ResourceKind::Domain, &payload).await?;
        let id = observed_id(&observed).unwrap_or_else(|| name.to_string());
        info!("Created domain '{id}'");

        observed.shift_remove("id");
        observed.insert(self.id_key().into(), Value::String(id));
        Ok(CreateOutcome {
            observed,
            unapplied: Vec::new(),
        })
    }

    async fn delete(&self, ctx: &HandlerContext<'_>, record: &ResourceRecord) -> Result<()> {
        let target = self.target(record)?;
        delete_ignoring_missing(ctx.client, &target).await
    }
}
