//! Resource type handlers.
//!
//! Each supported resource type has a [`ResourceHandler`] describing its
//! diff rules and how create, update and delete map onto provider calls.
//! Handlers are looked up through the [`HandlerRegistry`].

mod dns_record;
mod domain;
mod droplet;
mod firewall;
mod handler;
mod load_balancer;
mod registry;
mod volume;

pub use dns_record::DnsRecordHandler;
pub use domain::DomainHandler;
pub use droplet::DropletHandler;
pub use firewall::FirewallHandler;
pub use handler::{
    CreateOutcome, HandlerContext, ListSteps, ResourceHandler, TypedDiff, UpdateOutcome,
    check_required, delete_ignoring_missing, list_property, payload_from, rename_id, string_items, sync_droplets,
};
pub use load_balancer::LoadBalancerHandler;
pub use registry::HandlerRegistry;
pub use volume::VolumeHandler;
