// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Ferraform
//!
//! A declarative, idempotent infrastructure reconciler for DigitalOcean and
//! Vultr.
//!
//! ## Overview
//!
//! Desired resources are declared in `infrastructure.yml`. Every run
//! compares them with the recorded state and converges:
//!
//! - Resources not recorded yet are created
//! - Recorded resources with changed properties are updated in place where
//!   the provider allows it
//! - `destroy` tears down everything recorded, dependents first
//!
//! ## Architecture
//!
//! 1. **State Store**: the recorded resources, persisted after every change
//! 2. **Diff Engine**: per-property differences between desired and recorded
//! 3. **Planner**: classifies each resource as create, update or no-change
//! 4. **Reconciler**: executes the plan through the provider clients
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`state`]: State storage backends (local, S3)
//! - [`provider`]: DigitalOcean and Vultr API clients
//! - [`resources`]: Per-type handlers mapping resources onto provider calls
//! - [`planner`]: Diff computation, plans and plan execution
//! - [`reconciler`]: Locked deploy and destroy runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! resources:
//!   - name: web1
//!     type: droplet
//!     properties:
//!       region: nyc3
//!       size: s-1vcpu-1gb
//!       image: ubuntu-22-04-x64
//!       tags: [web]
//!   - name: data
//!     type: volume
//!     properties:
//!       region: nyc3
//!       size: 100
//!       attach_to: web1
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod resources;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, InfraConfig, ResourceSpec, UserSettings};
pub use error::{FerraformError, Result};
pub use planner::{DiffEngine, Plan, PlanExecutor, Planner};
pub use provider::{DigitalOceanClient, ProviderClient, ProviderSet, VultrClient};
pub use reconciler::{ReconciliationResult, Reconciler};
pub use resources::{HandlerRegistry, ResourceHandler};
pub use state::{LocalStateStore, S3StateStore, State, StateStore};
