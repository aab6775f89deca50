//! Task module - defines tasks, their lifecycle and execution results.
//!
//! - All types use algebraic data types with exhaustive matching
//! - State transitions are validated in one place (`Task::transition_to`)

pub mod task;

pub use task::{Task, TaskError, TaskId, TaskPriority, TaskResult, TaskStatus};
