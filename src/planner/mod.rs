//! Planner module - decomposes tasks into dependency-ordered subtask plans.
//!
//! # Key Concepts
//! - Plan: subtasks plus a dependency map and an execution strategy
//! - Validation: every dependency exists and the graph is acyclic
//! - Waves: groups of subtasks whose dependencies are all in earlier groups

mod plan;
mod planner;

pub use plan::{
    execution_waves, get_plan_stats, validate_plan, ExecutionStrategy, Plan, PlanError, PlanStats,
    PlanValidation, Subtask,
};
pub use planner::Planner;
