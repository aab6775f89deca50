//! Cron routines and the routines file.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Task, TaskError, TaskId, TaskPriority};

/// A task template fired on a cron schedule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRoutine {
    pub task_id: TaskId,
    pub cron_expression: String,
    pub task: Task,
    pub next_fire_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    schedule: cron::Schedule,
}

impl ScheduledRoutine {
    /// Parse `expression` and compute the first fire time after now.
    pub fn new(expression: &str, task: Task) -> Result<Self, String> {
        let cron_expression = normalize_cron(expression);
        let schedule = cron::Schedule::from_str(&cron_expression).map_err(|e| e.to_string())?;
        let next_fire_at = schedule.upcoming(Utc).next();
        Ok(Self {
            task_id: task.id(),
            cron_expression,
            task,
            next_fire_at,
            schedule,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_at.is_some_and(|at| at <= now)
    }

    /// Move `next_fire_at` past `now`.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.next_fire_at = self.schedule.after(&now).next();
    }
}

/// Accept standard five-field expressions by prepending a seconds field.
pub fn normalize_cron(expression: &str) -> String {
    let expression = expression.split_whitespace().collect::<Vec<_>>().join(" ");
    if expression.split(' ').count() == 5 {
        format!("0 {}", expression)
    } else {
        expression
    }
}

/// One entry of the routines file.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutineSpec {
    pub cron: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl RoutineSpec {
    pub fn to_task(&self) -> Result<Task, TaskError> {
        let mut task = Task::new(self.description.clone())?;
        if let Some(priority) = &self.priority {
            task = task.with_priority(TaskPriority::parse_lenient(priority));
        }
        match (&self.tool, &self.parameters) {
            (Some(tool), params) => {
                task = task.with_tool(tool.clone(), params.clone().unwrap_or(Value::Object(Default::default())))
            }
            (None, Some(params)) => task = task.with_parameters(params.clone()),
            (None, None) => {}
        }
        Ok(task)
    }
}

/// Read a JSON array of routines.
pub async fn load_routines(path: &Path) -> anyhow::Result<Vec<RoutineSpec>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}
