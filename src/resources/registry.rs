//! Lookup of resource handlers by type tag.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::normalize_type;

use super::dns_record::DnsRecordHandler;
use super::domain::DomainHandler;
use super::droplet::DropletHandler;
use super::firewall::FirewallHandler;
use super::handler::ResourceHandler;
use super::load_balancer::LoadBalancerHandler;
use super::volume::VolumeHandler;

/// Maps lower-cased type tags and aliases to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    /// Handlers in registration order.
    handlers: Vec<Arc<dyn ResourceHandler>>,
    /// Index into `handlers` by lower-cased tag.
    by_tag: HashMap<String, usize>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.known_types())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in handler.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DropletHandler));
        registry.register(Arc::new(VolumeHandler));
        registry.register(Arc::new(DomainHandler));
        registry.register(Arc::new(DnsRecordHandler));
        registry.register(Arc::new(FirewallHandler));
        registry.register(Arc::new(LoadBalancerHandler));
        registry
    }

    /// Registers a handler under its type name and aliases. A later
    /// registration of the same tag wins.
    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        let index = self.handlers.len();
        self.by_tag.insert(handler.type_name().to_lowercase(), index);
        for alias in handler.aliases() {
            self.by_tag.insert(alias.to_lowercase(), index);
        }
        self.handlers.push(handler);
    }

    /// Returns the handler for a type tag, case-insensitively.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<&dyn ResourceHandler> {
        let index = *self.by_tag.get(&normalize_type(resource_type))?;
        self.handlers.get(index).map(AsRef::as_ref)
    }

    /// Canonical names of the registered types.
    #[must_use]
    pub fn known_types(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.type_name()).collect()
    }
}
