//! Planning module.
//!
//! This module compares desired resources with recorded state, builds
//! plans from the differences, and executes them.

pub mod canonical;
mod diff;
mod executor;
mod plan;

pub use diff::{
    DiffDetail, DiffEngine, FieldChange, IGNORED_KEYS, list_diff, property_diff, scalar_diff,
};
pub use executor::{OutcomeStatus, PlanExecutor, ResourceOutcome, destroy_order};
pub use plan::{ChangeAction, Plan, PlanCounts, PlanMode, PlannedChange, Planner};
