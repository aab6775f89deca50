//! Core Task type and its lifecycle.
//!
//! # Invariants
//! - `id` is unique within an engine
//! - `status` only changes through [`Task::transition_to`], which enforces the
//!   state machine below
//! - `updated_at >= created_at`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// # Properties
/// - Globally unique within an execution context
/// - Immutable once created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Running -> Completed
///              |  ^  \-> Failed
///              v  |
///             Paused ---> Failed
///
/// any non-terminal state -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to be executed
    Pending,
    /// Task is currently being executed
    Running,
    /// Task is suspended at its next yield point
    Paused,
    /// Task completed successfully
    Completed,
    /// Task failed with an error
    Failed,
    /// Task was cancelled before completion
    Cancelled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    ///
    /// # Property
    /// `is_terminal() => !can_transition_to(x)` for every `x`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Relative urgency of a task. Feeds the scope component of complexity scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Parse a priority string, falling back to `Normal` on anything unknown.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => TaskPriority::Low,
            "high" => TaskPriority::High,
            "critical" | "urgent" => TaskPriority::Critical,
            _ => TaskPriority::Normal,
        }
    }
}

/// A unit of work driven by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: TaskId,
    description: String,
    status: TaskStatus,
    priority: TaskPriority,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    /// Tool to invoke directly, bypassing decomposition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool: Option<String>,

    /// Arguments for `tool`, or free-form hints for planning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

impl Task {
    /// Create a new pending task.
    ///
    /// # Errors
    /// Returns `Err` if `description` is blank.
    pub fn new(description: impl Into<String>) -> Result<Self, TaskError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(TaskError::EmptyDescription);
        }
        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            description,
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            created_at: now,
            updated_at: now,
            tool: None,
            parameters: None,
        })
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>, parameters: Value) -> Self {
        self.tool = Some(tool.into());
        self.parameters = Some(parameters);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Fresh pending copy of this task with a new id, used when a routine fires.
    pub fn instantiate(&self) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    pub fn parameters(&self) -> Option<&Value> {
        self.parameters.as_ref()
    }

    /// Move to `next`, validating against the state machine.
    ///
    /// # Errors
    /// Returns `TaskError::InvalidTransition` if the edge is not allowed.
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Outcome of one `execute_task` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(task_id: TaskId, data: Value) -> Self {
        Self {
            task_id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task description cannot be empty")]
    EmptyDescription,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_description_rejected() {
        assert!(matches!(Task::new("   "), Err(TaskError::EmptyDescription)));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new("write the report").unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Paused).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.status().is_terminal());
        assert!(task.updated_at() >= task.created_at());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            for next in [
                TaskStatus::Pending,
                TaskStatus::Running,
                TaskStatus::Paused,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_invalid_transition_reports_edge() {
        let mut task = Task::new("x").unwrap();
        let err = task.transition_to(TaskStatus::Completed).unwrap_err();
        match err {
            TaskError::InvalidTransition { from, to } => {
                assert_eq!(from, TaskStatus::Pending);
                assert_eq!(to, TaskStatus::Completed);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn test_instantiate_gives_fresh_pending_copy() {
        let mut template = Task::new("nightly sync")
            .unwrap()
            .with_priority(TaskPriority::High)
            .with_tool("sync", json!({"target": "all"}));
        template.transition_to(TaskStatus::Running).unwrap();

        let fired = template.instantiate();
        assert_ne!(fired.id(), template.id());
        assert_eq!(fired.status(), TaskStatus::Pending);
        assert_eq!(fired.priority(), TaskPriority::High);
        assert_eq!(fired.tool(), Some("sync"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let task = Task::new("x").unwrap();
        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["status"], "pending");
        assert!(value.get("tool").is_none());
    }

    #[test]
    fn test_priority_parse_lenient() {
        assert_eq!(TaskPriority::parse_lenient("HIGH"), TaskPriority::High);
        assert_eq!(TaskPriority::parse_lenient("whatever"), TaskPriority::Normal);
    }
}
