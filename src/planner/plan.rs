//! Plans: subtasks, their dependency graph and how to run them.
//!
//! # Invariants (checked by [`validate_plan`])
//! - Every id referenced by a dependency exists in `subtasks`
//! - The dependency graph is acyclic

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Task, TaskPriority};

/// How independent subtasks of a plan are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// One subtask at a time, in dependency order
    #[default]
    Sequential,
    /// Every ready subtask of a wave at once
    Parallel,
    /// Waves in order, ready subtasks within a wave at once
    Hybrid,
}

impl ExecutionStrategy {
    /// Parse a strategy name; anything unrecognized is `Sequential`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "parallel" => ExecutionStrategy::Parallel,
            "hybrid" => ExecutionStrategy::Hybrid,
            _ => ExecutionStrategy::Sequential,
        }
    }

    pub fn runs_concurrently(&self) -> bool {
        !matches!(self, ExecutionStrategy::Sequential)
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Relative effort (higher = more work)
    #[serde(default = "default_effort")]
    pub estimated_effort: f64,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Tool to invoke instead of a model call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

fn default_effort() -> f64 {
    1.0
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: TaskPriority::default(),
            estimated_effort: default_effort(),
            depends_on: Vec::new(),
            tool: None,
            arguments: None,
        }
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_effort(mut self, effort: f64) -> Self {
        self.estimated_effort = effort.max(0.0);
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>, arguments: Value) -> Self {
        self.tool = Some(tool.into());
        self.arguments = Some(arguments);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub original_task: Task,
    pub subtasks: Vec<Subtask>,
    /// Subtask id → ids it waits for
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub strategy: ExecutionStrategy,
}

impl Plan {
    /// Build a plan whose dependency map mirrors each subtask's `depends_on`.
    pub fn new(original_task: Task, subtasks: Vec<Subtask>, strategy: ExecutionStrategy) -> Self {
        let dependencies = subtasks
            .iter()
            .map(|s| (s.id.clone(), s.depends_on.clone()))
            .collect();
        Self {
            original_task,
            subtasks,
            dependencies,
            strategy,
        }
    }

    /// A plan with one subtask that does the whole task.
    pub fn single(task: &Task) -> Self {
        let mut subtask = Subtask::new("1", task.description());
        subtask.priority = task.priority();
        if let Some(tool) = task.tool() {
            let arguments = task
                .parameters()
                .filter(|p| !p.is_null())
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            subtask = subtask.with_tool(tool, arguments);
        }
        Self::new(task.clone(), vec![subtask], ExecutionStrategy::Sequential)
    }

    /// Dependencies of `id`: its `depends_on` plus any map entry, without duplicates.
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let from_subtask = self
            .subtasks
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.depends_on.as_slice())
            .unwrap_or_default();
        let from_map = self.dependencies.get(id).map(Vec::as_slice).unwrap_or_default();
        for dep in from_subtask.iter().chain(from_map) {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        deps
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStats {
    pub total_tasks: usize,
    pub total_effort: f64,
    /// Subtasks with no dependencies
    pub parallelizable: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid plan: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Check references and acyclicity of the dependency graph.
///
/// `valid` is false exactly when a dependency names an unknown subtask or the
/// graph has a cycle.
pub fn validate_plan(plan: &Plan) -> PlanValidation {
    let ids: HashSet<&str> = plan.subtasks.iter().map(|s| s.id.as_str()).collect();
    let mut errors = Vec::new();

    let mut nodes: Vec<String> = plan.subtasks.iter().map(|s| s.id.clone()).collect();
    for key in plan.dependencies.keys() {
        if !ids.contains(key.as_str()) {
            errors.push(format!("Dependency map references unknown subtask '{}'", key));
            nodes.push(key.clone());
        }
    }

    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for node in &nodes {
        let deps = plan.dependencies_of(node);
        for dep in &deps {
            if !ids.contains(dep.as_str()) {
                errors.push(format!("Subtask '{}' depends on unknown subtask '{}'", node, dep));
            }
        }
        edges.insert(node.clone(), deps);
    }

    let mut marks: HashMap<&str, Mark> = nodes.iter().map(|n| (n.as_str(), Mark::Unvisited)).collect();
    for node in &nodes {
        if marks.get(node.as_str()) == Some(&Mark::Unvisited) {
            let mut path = Vec::new();
            if let Some(cycle) = find_cycle(node, &edges, &mut marks, &mut path) {
                errors.push(format!("Dependency cycle: {}", cycle.join(" -> ")));
            }
        }
    }

    PlanValidation {
        valid: errors.is_empty(),
        errors,
    }
}

fn find_cycle<'a>(
    node: &'a str,
    edges: &'a HashMap<String, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    marks.insert(node, Mark::InProgress);
    path.push(node);

    for dep in edges.get(node).into_iter().flatten() {
        match marks.get(dep.as_str()).copied() {
            Some(Mark::InProgress) => {
                let start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }
            Some(Mark::Unvisited) => {
                if let Some(cycle) = find_cycle(dep, edges, marks, path) {
                    return Some(cycle);
                }
            }
            // Done, or an unknown id (reported separately)
            _ => {}
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    None
}

pub fn get_plan_stats(plan: &Plan) -> PlanStats {
    PlanStats {
        total_tasks: plan.subtasks.len(),
        total_effort: plan.subtasks.iter().map(|s| s.estimated_effort).sum(),
        parallelizable: plan
            .subtasks
            .iter()
            .filter(|s| plan.dependencies_of(&s.id).is_empty())
            .count(),
    }
}

/// Group subtask indices into waves; every subtask's dependencies sit in earlier waves.
///
/// Within a wave, indices keep plan order.
pub fn execution_waves(plan: &Plan) -> Result<Vec<Vec<usize>>, PlanError> {
    let validation = validate_plan(plan);
    if !validation.valid {
        return Err(PlanError::Invalid(validation.errors));
    }

    let index: HashMap<&str, usize> = plan
        .subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let n = plan.subtasks.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, subtask) in plan.subtasks.iter().enumerate() {
        for dep in plan.dependencies_of(&subtask.id) {
            if let Some(&d) = index.get(dep.as_str()) {
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut waves = Vec::new();
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0;
    while !ready.is_empty() {
        let mut next = Vec::new();
        for &i in &ready {
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        placed += ready.len();
        next.sort_unstable();
        waves.push(std::mem::replace(&mut ready, next));
    }

    if placed != n {
        // duplicate ids can hide a cycle from validation
        return Err(PlanError::Invalid(vec!["Dependency cycle".to_string()]));
    }
    Ok(waves)
}
