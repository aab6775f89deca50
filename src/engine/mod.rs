//! Engine module - owns running and scheduled tasks and drives them through
//! planning, routing, tool calls and safety transactions.
//!
//! # Key Concepts
//! - Routines: task templates fired on cron schedules by the dispatch loop
//! - Yield points: pause and cancel take effect between steps
//! - Events: four lifecycle notifications over a broadcast channel

mod engine;
mod events;
mod scheduler;

pub use engine::{EngineError, TaskEngine};
pub use events::TaskEvent;
pub use scheduler::{load_routines, normalize_cron, RoutineSpec, ScheduledRoutine};
