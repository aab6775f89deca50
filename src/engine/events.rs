//! Task lifecycle notifications.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::task::{Task, TaskStatus};

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskStarted { task: Task },
    TaskCompleted { task: Task },
    TaskFailed { task: Task },
    TaskStatusChanged { task: Task, status: TaskStatus },
}

impl TaskEvent {
    pub fn task(&self) -> &Task {
        match self {
            TaskEvent::TaskStarted { task }
            | TaskEvent::TaskCompleted { task }
            | TaskEvent::TaskFailed { task }
            | TaskEvent::TaskStatusChanged { task, .. } => task,
        }
    }
}

/// Fan-out of [`TaskEvent`]s. Slow subscribers lag; the sender never waits.
#[derive(Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TaskEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn status_changed(&self, task: &Task) {
        self.emit(TaskEvent::TaskStatusChanged {
            task: task.clone(),
            status: task.status(),
        });
    }
}
