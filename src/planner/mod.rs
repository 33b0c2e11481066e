//! Plan computation: the pure diff engine and the plan types it produces.

mod diff;
mod plan;

pub use diff::DiffEngine;
pub use plan::{Plan, PlannedChange, PlannedDelete};
