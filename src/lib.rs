//! # taskpilot
//!
//! Autonomous task execution core for an assistant.
//!
//! This library provides:
//! - A task engine with cron routines, pause/resume/cancel and lifecycle events
//! - A planner that decomposes tasks into dependency-ordered subtasks
//! - A cost router that picks the cheapest suitable model and tracks spend
//! - A git-backed safety guard that rolls back failed mutating operations
//! - An MCP client that fans out over several tool servers
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!   routines ───▶ │    TaskEngine    │ ───▶ TaskEvent (broadcast)
//!                 └────────┬─────────┘
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!     ┌─────────┐    ┌────────────┐   ┌────────────┐
//!     │ Planner │──▶ │ CostRouter │   │ McpManager │
//!     └─────────┘    └─────┬──────┘   └─────┬──────┘
//!                          ▼                ▼
//!                    LlmProvider      SafetyGuard (git)
//! ```
//!
//! ## Modules
//! - `engine`: task state machine and cron dispatch
//! - `planner`: plans, validation and execution waves
//! - `budget`: complexity scoring, pricing and routing
//! - `safety`: git transactions and the audit log
//! - `mcp`: tool server registry, transports and dispatch
//! - `llm`: language model capability and the OpenRouter provider
//! - `task`: task definitions and results

pub mod budget;
pub mod config;
pub mod context;
pub mod engine;
pub mod llm;
pub mod mcp;
pub mod planner;
pub mod safety;
pub mod task;
pub mod util;

pub use config::Config;
pub use engine::{EngineError, TaskEngine, TaskEvent};
pub use task::{Task, TaskId, TaskResult, TaskStatus};
