//! The task engine: state machine, cron dispatch and plan execution.
//!
//! # Execution of one task
//! 1. PENDING → RUNNING, emit `TaskStarted`
//! 2. Plan (tool tasks and trivial tasks get a single-step plan)
//! 3. Route through the cost router
//! 4. Run the plan wave by wave; mutating tools go through the safety guard.
//!    Complex model steps are planned again, down to the planner's `max_depth`
//! 5. RUNNING → COMPLETED / FAILED, emit the matching event
//!
//! Cancellation and pause are cooperative: the status flag is checked between
//! steps, never preempting an in-flight call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::budget::CostRouter;
use crate::config::EngineConfig;
use crate::context::ContextProvider;
use crate::mcp::{DiscoveredTool, McpManager, ToolCallResult};
use crate::planner::{execution_waves, get_plan_stats, Plan, Planner, Subtask};
use crate::safety::{SafetyGuard, TransactionError};
use crate::task::{Task, TaskError, TaskId, TaskResult, TaskStatus};
use crate::util::truncate_chars;

use super::events::{EventBus, TaskEvent};
use super::scheduler::ScheduledRoutine;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error(transparent)]
    Task(#[from] TaskError),

    /// The safety guard could not protect or restore the repository.
    #[error(transparent)]
    Transaction(TransactionError),
}

/// Live state of a running task, shared with pause/resume/cancel callers.
struct TaskHandle {
    task: RwLock<Task>,
    status: watch::Sender<TaskStatus>,
}

impl TaskHandle {
    fn new(task: Task) -> Self {
        let (status, _) = watch::channel(task.status());
        Self {
            task: RwLock::new(task),
            status,
        }
    }

    async fn snapshot(&self) -> Task {
        self.task.read().await.clone()
    }

    /// Apply a transition and publish the new status.
    async fn transition(&self, next: TaskStatus) -> Result<Task, TaskError> {
        let mut task = self.task.write().await;
        task.transition_to(next)?;
        self.status.send_replace(next);
        Ok(task.clone())
    }
}

/// Why a task stopped before finishing its plan.
enum Interrupted {
    Cancelled,
    /// The safety guard could not protect or restore the repository
    Fatal(TransactionError),
}

enum Outcome {
    Completed(Value),
    Failed { error: String, data: Option<Value> },
    Cancelled,
    Fatal(TransactionError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubtaskReport {
    id: String,
    success: bool,
    skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    /// Reports of a nested plan when this step was decomposed further
    #[serde(skip_serializing_if = "Vec::is_empty")]
    steps: Vec<SubtaskReport>,
}

impl SubtaskReport {
    fn ok(id: &str, output: String, model: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            success: true,
            skipped: false,
            output: Some(output),
            error: None,
            model,
            steps: Vec::new(),
        }
    }

    fn failed(id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            skipped: false,
            output: None,
            error: Some(error.into()),
            model: None,
            steps: Vec::new(),
        }
    }

    fn skipped(id: &str, reason: String) -> Self {
        Self {
            skipped: true,
            ..Self::failed(id, reason)
        }
    }

    /// Fold the reports of a nested plan into one step.
    fn nested(id: &str, steps: Vec<SubtaskReport>) -> Self {
        let mut report = match failure_summary(&steps) {
            None => {
                let output = steps
                    .iter()
                    .filter_map(|s| s.output.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Self::ok(id, truncate_chars(&output, OUTPUT_PREVIEW_CHARS), None)
            }
            Some(error) => Self::failed(id, error),
        };
        report.steps = steps;
        report
    }
}

/// `None` when every report succeeded, otherwise the task-level error message.
fn failure_summary(reports: &[SubtaskReport]) -> Option<String> {
    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| !r.success)
        .map(|r| r.id.as_str())
        .collect();
    if failed.is_empty() {
        return None;
    }
    let first_error = reports
        .iter()
        .find(|r| !r.success && !r.skipped)
        .and_then(|r| r.error.clone())
        .unwrap_or_default();
    Some(if reports.len() == 1 {
        first_error
    } else {
        format!(
            "{} of {} subtasks failed ({}): {}",
            failed.len(),
            reports.len(),
            failed.join(", "),
            first_error
        )
    })
}

/// Characters of subtask output kept in results and context notes
const OUTPUT_PREVIEW_CHARS: usize = 2000;

pub struct TaskEngine {
    config: EngineConfig,
    router: Arc<CostRouter>,
    planner: Arc<Planner>,
    mcp: Arc<McpManager>,
    guard: Option<Arc<SafetyGuard>>,
    context: Arc<dyn ContextProvider>,
    tools: RwLock<Vec<DiscoveredTool>>,
    running: RwLock<HashMap<TaskId, Arc<TaskHandle>>>,
    scheduled: RwLock<BTreeMap<TaskId, ScheduledRoutine>>,
    events: EventBus,
    dispatcher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TaskEngine {
    pub fn new(
        config: EngineConfig,
        router: Arc<CostRouter>,
        planner: Arc<Planner>,
        mcp: Arc<McpManager>,
        context: Arc<dyn ContextProvider>,
    ) -> Self {
        Self {
            config,
            router,
            planner,
            mcp,
            guard: None,
            context,
            tools: RwLock::new(Vec::new()),
            running: RwLock::new(HashMap::new()),
            scheduled: RwLock::new(BTreeMap::new()),
            events: EventBus::new(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Run mutating tool calls inside `guard`'s transactions.
    pub fn with_guard(mut self, guard: Arc<SafetyGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Connect tool servers and discover their tools.
    ///
    /// Never fails; without tool servers the engine runs model-only tasks.
    pub async fn initialize(&self) {
        let connected = self.mcp.connect_to_all_servers().await;
        let tools = self.mcp.discover_tools().await;
        tracing::info!(
            servers = connected.len(),
            tools = tools.len(),
            "Task engine initialized"
        );
        if connected.is_empty() {
            tracing::warn!("No tool servers connected, running without tools");
        }
        *self.tools.write().await = tools;
    }

    pub async fn available_tools(&self) -> Vec<DiscoveredTool> {
        self.tools.read().await.clone()
    }

    // ==================== Scheduling ====================

    /// Start the cron dispatch loop. A second call while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            tracing::debug!("Dispatch loop already running");
            return;
        }

        let token = CancellationToken::new();
        let engine = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = interval.tick() => engine.dispatch_due().await,
                }
            }
            tracing::debug!("Dispatch loop stopped");
        });
        *dispatcher = Some((token, handle));
        tracing::info!(tick_ms = self.config.tick_interval.as_millis() as u64, "Task engine started");
    }

    /// Stop the dispatch loop, consolidate context and disconnect tool servers.
    ///
    /// Tasks already running are not interrupted.
    pub async fn stop(&self) {
        if let Some((token, handle)) = self.dispatcher.lock().await.take() {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("Dispatch loop ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.context.consolidate().await {
            tracing::warn!("Context consolidation failed: {:#}", e);
        }
        self.mcp.disconnect_all().await;
        tracing::info!("Task engine stopped");
    }

    /// Spawn every routine whose fire time has passed.
    async fn dispatch_due(self: &Arc<Self>) {
        let now = chrono::Utc::now();
        let due: Vec<Task> = {
            let mut scheduled = self.scheduled.write().await;
            scheduled
                .values_mut()
                .filter(|r| r.is_due(now))
                .map(|routine| {
                    routine.advance(now);
                    routine.task.instantiate()
                })
                .collect()
        };

        for task in due {
            tracing::info!(task_id = %task.id(), description = %task.description(), "Routine fired");
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                let task_id = task.id();
                if let Err(e) = engine.execute_task(task).await {
                    tracing::error!(task_id = %task_id, "Routine task failed: {}", e);
                }
            });
        }
    }

    /// Register `task` to fire on `cron_expression`. Returns the routine's id.
    pub async fn schedule_routine(&self, cron_expression: &str, task: Task) -> Result<TaskId, EngineError> {
        let routine = ScheduledRoutine::new(cron_expression, task).map_err(|reason| EngineError::InvalidCron {
            expression: cron_expression.to_string(),
            reason,
        })?;
        let id = routine.task_id;
        tracing::info!(
            task_id = %id,
            cron = %routine.cron_expression,
            next = ?routine.next_fire_at,
            "Scheduled routine"
        );
        self.scheduled.write().await.insert(id, routine);
        Ok(id)
    }

    pub async fn unschedule_routine(&self, id: TaskId) -> bool {
        self.scheduled.write().await.remove(&id).is_some()
    }

    pub async fn get_scheduled_routines(&self) -> Vec<ScheduledRoutine> {
        self.scheduled.read().await.values().cloned().collect()
    }

    pub async fn get_running_task_ids(&self) -> Vec<TaskId> {
        self.running.read().await.keys().copied().collect()
    }

    // ==================== Control ====================

    pub async fn pause_task(&self, id: TaskId) -> bool {
        self.flip_status(id, TaskStatus::Running, TaskStatus::Paused).await
    }

    pub async fn resume_task(&self, id: TaskId) -> bool {
        self.flip_status(id, TaskStatus::Paused, TaskStatus::Running).await
    }

    async fn flip_status(&self, id: TaskId, from: TaskStatus, to: TaskStatus) -> bool {
        let Some(handle) = self.running.read().await.get(&id).cloned() else {
            return false;
        };
        let mut task = handle.task.write().await;
        if task.status() != from || task.transition_to(to).is_err() {
            return false;
        }
        handle.status.send_replace(to);
        tracing::info!(task_id = %id, status = ?to, "Task status changed");
        self.events.status_changed(&task);
        true
    }

    /// Cancel a running task and/or remove its routine.
    ///
    /// Returns whether anything was cancelled. The task stops at its next
    /// yield point.
    pub async fn cancel_task(&self, id: TaskId) -> bool {
        let unscheduled = self.unschedule_routine(id).await;
        let handle = self.running.read().await.get(&id).cloned();
        let cancelled = match handle {
            Some(handle) => self.mark_cancelled(&handle).await,
            None => false,
        };
        if unscheduled || cancelled {
            tracing::info!(task_id = %id, unscheduled, cancelled, "Task cancelled");
        }
        unscheduled || cancelled
    }

    async fn mark_cancelled(&self, handle: &TaskHandle) -> bool {
        match handle.transition(TaskStatus::Cancelled).await {
            Ok(task) => {
                self.events.status_changed(&task);
                true
            }
            Err(_) => false,
        }
    }

    /// Cancel every running task and drop every routine.
    ///
    /// Returns the ids of all affected tasks and routines.
    pub async fn emergency_stop(&self) -> Vec<TaskId> {
        let mut running = self.running.write().await;
        let mut scheduled = self.scheduled.write().await;

        let mut ids = Vec::with_capacity(running.len() + scheduled.len());
        for (id, handle) in running.drain() {
            self.mark_cancelled(&handle).await;
            ids.push(id);
        }
        ids.extend(std::mem::take(&mut *scheduled).into_keys());

        if !ids.is_empty() {
            tracing::warn!(count = ids.len(), "Emergency stop");
        }
        ids
    }

    // ==================== Execution ====================

    /// Run `task` to completion.
    ///
    /// Ordinary failures (tool errors, model errors, a dirty tree) come back as
    /// `Ok` with `success: false`. `Err` means the safety guard could not keep
    /// the repository consistent.
    pub async fn execute_task(&self, task: Task) -> Result<TaskResult, EngineError> {
        let id = task.id();
        let handle = {
            let mut running = self.running.write().await;
            if running.contains_key(&id) {
                return Err(EngineError::AlreadyRunning(id));
            }
            let handle = Arc::new(TaskHandle::new(task));
            let started = handle.transition(TaskStatus::Running).await?;
            running.insert(id, Arc::clone(&handle));
            tracing::info!(task_id = %id, description = %started.description(), "Task started");
            self.events.emit(TaskEvent::TaskStarted { task: started.clone() });
            self.events.status_changed(&started);
            handle
        };

        let outcome = self.run(&handle).await;
        let result = self.finish(&handle, outcome).await;
        self.running.write().await.remove(&id);
        result
    }

    async fn finish(&self, handle: &TaskHandle, outcome: Outcome) -> Result<TaskResult, EngineError> {
        let id = handle.snapshot().await.id();
        match outcome {
            Outcome::Completed(data) => match self.settle(handle, TaskStatus::Completed).await {
                Ok(task) => {
                    tracing::info!(task_id = %id, "Task completed");
                    self.events.status_changed(&task);
                    self.events.emit(TaskEvent::TaskCompleted { task: task.clone() });
                    let note = format!("Completed: {}", task.description());
                    if let Err(e) = self.context.update_short_term(&note).await {
                        tracing::warn!(task_id = %id, "Failed to record context: {:#}", e);
                    }
                    Ok(TaskResult::success(id, data))
                }
                Err(_) => Ok(cancelled_result(id)),
            },
            Outcome::Failed { error, data } => match self.settle(handle, TaskStatus::Failed).await {
                Ok(task) => {
                    tracing::warn!(task_id = %id, "Task failed: {}", error);
                    self.events.status_changed(&task);
                    self.events.emit(TaskEvent::TaskFailed { task });
                    let result = TaskResult::failure(id, error);
                    Ok(match data {
                        Some(data) => result.with_data(data),
                        None => result,
                    })
                }
                Err(_) => Ok(cancelled_result(id)),
            },
            Outcome::Cancelled => {
                tracing::info!(task_id = %id, "Task stopped after cancellation");
                Ok(cancelled_result(id))
            }
            Outcome::Fatal(error) => {
                tracing::error!(task_id = %id, "Task aborted: {}", error);
                if let Ok(task) = handle.transition(TaskStatus::Failed).await {
                    self.events.status_changed(&task);
                    self.events.emit(TaskEvent::TaskFailed { task });
                }
                Err(EngineError::Transaction(error))
            }
        }
    }

    /// Move to a terminal status, waiting out a pause first.
    async fn settle(&self, handle: &TaskHandle, target: TaskStatus) -> Result<Task, Interrupted> {
        loop {
            self.checkpoint(handle).await?;
            match handle.transition(target).await {
                Ok(task) => return Ok(task),
                // paused between the checkpoint and the transition
                Err(_) if handle.snapshot().await.status() == TaskStatus::Paused => continue,
                Err(_) => return Err(Interrupted::Cancelled),
            }
        }
    }

    /// Yield point: returns once the task is running, or `Err` if it was cancelled.
    async fn checkpoint(&self, handle: &TaskHandle) -> Result<(), Interrupted> {
        let mut rx = handle.status.subscribe();
        let status = match rx.wait_for(|s| *s != TaskStatus::Paused).await {
            Ok(status) => *status,
            Err(_) => TaskStatus::Cancelled,
        };
        match status {
            TaskStatus::Running => Ok(()),
            _ => Err(Interrupted::Cancelled),
        }
    }

    async fn run(&self, handle: &TaskHandle) -> Outcome {
        match self.run_inner(handle).await {
            Ok(outcome) => outcome,
            Err(Interrupted::Cancelled) => Outcome::Cancelled,
            Err(Interrupted::Fatal(error)) => Outcome::Fatal(error),
        }
    }

    async fn run_inner(&self, handle: &TaskHandle) -> Result<Outcome, Interrupted> {
        let task = handle.snapshot().await;
        let context = match self.context.load_context().await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(task_id = %task.id(), "Failed to load context: {:#}", e);
                String::new()
            }
        };
        let tools = self.available_tools().await;
        self.checkpoint(handle).await?;

        let routing = match self.router.route(&task) {
            Ok(routing) => routing,
            Err(e) => {
                return Ok(Outcome::Failed {
                    error: e.to_string(),
                    data: None,
                })
            }
        };
        tracing::debug!(task_id = %task.id(), model = %routing.model, complexity = routing.complexity, "Routed task");

        let plan = if task.tool().is_some() || routing.complexity < self.planner.config().trivial_threshold {
            Plan::single(&task)
        } else {
            self.planner.create_plan(&task, 0, &tools, &context).await
        };
        let waves = match execution_waves(&plan) {
            Ok(waves) => waves,
            Err(e) => {
                return Ok(Outcome::Failed {
                    error: e.to_string(),
                    data: None,
                })
            }
        };
        self.checkpoint(handle).await?;

        let reports = self
            .execute_plan(handle, &task, &plan, waves, &context, &tools, 0)
            .await?;

        let data = json!({
            "routing": routing,
            "strategy": plan.strategy,
            "stats": get_plan_stats(&plan),
            "subtasks": reports,
        });

        Ok(match failure_summary(&reports) {
            None => Outcome::Completed(data),
            Some(error) => Outcome::Failed {
                error,
                data: Some(data),
            },
        })
    }

    /// Run `plan` wave by wave and return one report per subtask, in plan order.
    ///
    /// Subtasks whose dependencies did not succeed are skipped. `depth` is the
    /// nesting level of `plan`; model steps may be decomposed one level deeper.
    #[allow(clippy::too_many_arguments)]
    #[async_recursion::async_recursion]
    async fn execute_plan(
        &self,
        handle: &TaskHandle,
        task: &Task,
        plan: &Plan,
        waves: Vec<Vec<usize>>,
        context: &str,
        tools: &[DiscoveredTool],
        depth: u32,
    ) -> Result<Vec<SubtaskReport>, Interrupted> {
        let mut reports: HashMap<String, SubtaskReport> = HashMap::new();
        for wave in waves {
            let mut runnable = Vec::new();
            for index in wave {
                let subtask = &plan.subtasks[index];
                let blocked: Vec<String> = plan
                    .dependencies_of(&subtask.id)
                    .into_iter()
                    .filter(|dep| reports.get(dep).map_or(true, |r| !r.success))
                    .collect();
                if blocked.is_empty() {
                    runnable.push(subtask);
                } else {
                    let reason = format!("skipped: dependency {} did not succeed", blocked.join(", "));
                    reports.insert(subtask.id.clone(), SubtaskReport::skipped(&subtask.id, reason));
                }
            }

            let results = if plan.strategy.runs_concurrently() {
                join_all(
                    runnable
                        .iter()
                        .map(|s| self.run_subtask(handle, task, s, context, tools, depth)),
                )
                .await
            } else {
                let mut results = Vec::with_capacity(runnable.len());
                for subtask in &runnable {
                    self.checkpoint(handle).await?;
                    results.push(self.run_subtask(handle, task, subtask, context, tools, depth).await);
                }
                results
            };

            let mut interrupted = None;
            for result in results {
                match result {
                    Ok(report) => {
                        reports.insert(report.id.clone(), report);
                    }
                    Err(fatal @ Interrupted::Fatal(_)) => return Err(fatal),
                    Err(cancelled) => interrupted = Some(cancelled),
                }
            }
            if let Some(cancelled) = interrupted {
                return Err(cancelled);
            }
            self.checkpoint(handle).await?;
        }

        Ok(plan
            .subtasks
            .iter()
            .filter_map(|s| reports.remove(&s.id))
            .collect())
    }

    async fn run_subtask(
        &self,
        handle: &TaskHandle,
        task: &Task,
        subtask: &Subtask,
        context: &str,
        tools: &[DiscoveredTool],
        depth: u32,
    ) -> Result<SubtaskReport, Interrupted> {
        match &subtask.tool {
            Some(tool) => self.run_tool_subtask(subtask, tool).await.map_err(Interrupted::Fatal),
            None => self.run_model_subtask(handle, task, subtask, context, tools, depth).await,
        }
    }

    /// `Err` only for guard failures that must abort the task.
    async fn run_tool_subtask(&self, subtask: &Subtask, tool: &str) -> Result<SubtaskReport, TransactionError> {
        let arguments = subtask.arguments.clone().unwrap_or_else(|| json!({}));
        let mutating = self
            .mcp
            .find_tool(tool)
            .await
            .map(|t| !t.descriptor.is_read_only())
            .unwrap_or(false);

        let guard = match &self.guard {
            Some(guard) if mutating => guard,
            _ => {
                return Ok(match self.mcp.invoke_tool(tool, arguments).await {
                    Ok(result) => tool_report(&subtask.id, result),
                    Err(e) => SubtaskReport::failed(&subtask.id, e.to_string()),
                });
            }
        };

        let mcp = Arc::clone(&self.mcp);
        let name = tool.to_string();
        let transaction = guard
            .execute(&subtask.description, move || async move {
                let result = mcp.invoke_tool(&name, arguments).await?;
                if result.is_error {
                    anyhow::bail!("{}", result.text_content());
                }
                Ok(result)
            })
            .await;

        match transaction {
            Ok(result) => Ok(tool_report(&subtask.id, result)),
            Err(TransactionError::Operation(e)) => Ok(SubtaskReport::failed(&subtask.id, format!("{:#}", e))),
            Err(e @ TransactionError::DirtyWorkingTree { .. }) => Ok(SubtaskReport::failed(&subtask.id, e.to_string())),
            Err(fatal) => Err(fatal),
        }
    }

    /// Answer a step with the model, decomposing it first when it is complex
    /// enough and the nesting limit allows.
    async fn run_model_subtask(
        &self,
        handle: &TaskHandle,
        task: &Task,
        subtask: &Subtask,
        context: &str,
        tools: &[DiscoveredTool],
        depth: u32,
    ) -> Result<SubtaskReport, Interrupted> {
        // route each step by its own complexity
        let step = Task::new(subtask.description.clone())
            .map(|t| t.with_priority(subtask.priority))
            .unwrap_or_else(|_| task.clone());

        // a step that restates its whole task has already been planned
        let complex = step.description() != task.description()
            && self.router.analyze_complexity(&step).total >= self.planner.config().trivial_threshold;
        if complex {
            let nested = self.planner.create_plan(&step, depth + 1, tools, context).await;
            if nested.subtasks.len() > 1 {
                if let Ok(waves) = execution_waves(&nested) {
                    tracing::debug!(
                        task_id = %task.id(),
                        subtask = %subtask.id,
                        depth = depth + 1,
                        steps = nested.subtasks.len(),
                        "Decomposed subtask"
                    );
                    self.checkpoint(handle).await?;
                    let steps = self
                        .execute_plan(handle, &step, &nested, waves, context, tools, depth + 1)
                        .await?;
                    return Ok(SubtaskReport::nested(&subtask.id, steps));
                }
            }
        }

        let mut prompt = String::new();
        if !context.trim().is_empty() {
            prompt.push_str(&format!("{}\n\n", context.trim()));
        }
        if step.description() != task.description() {
            prompt.push_str(&format!("Overall task: {}\n\n", task.description()));
        }
        prompt.push_str(&format!("Do the following and report the result:\n{}", subtask.description));

        Ok(match self.router.generate_text(&step, &prompt).await {
            Ok(generation) => SubtaskReport::ok(
                &subtask.id,
                truncate_chars(&generation.text, OUTPUT_PREVIEW_CHARS),
                Some(generation.model),
            ),
            Err(e) => SubtaskReport::failed(&subtask.id, e.to_string()),
        })
    }
}

fn tool_report(id: &str, result: ToolCallResult) -> SubtaskReport {
    let text = truncate_chars(&result.text_content(), OUTPUT_PREVIEW_CHARS);
    if result.is_error {
        SubtaskReport::failed(id, text)
    } else {
        SubtaskReport::ok(id, text, None)
    }
}

fn cancelled_result(id: TaskId) -> TaskResult {
    TaskResult::failure(id, "cancelled")
}
