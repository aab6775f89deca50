//! LLM-backed task decomposition.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::budget::CostRouter;
use crate::config::PlannerConfig;
use crate::mcp::DiscoveredTool;
use crate::task::{Task, TaskPriority};

use super::plan::{validate_plan, ExecutionStrategy, Plan, Subtask};

/// Splits tasks into plans using text from the cost router.
pub struct Planner {
    config: PlannerConfig,
    router: Arc<CostRouter>,
}

impl Planner {
    pub fn new(config: PlannerConfig, router: Arc<CostRouter>) -> Self {
        Self { config, router }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Build a plan for `task`.
    ///
    /// Never fails: when decomposition is disabled, too deep, or the model's
    /// answer is unusable, the result is a single-subtask plan.
    pub async fn create_plan(&self, task: &Task, depth: u32, tools: &[DiscoveredTool], context: &str) -> Plan {
        if !self.config.enabled || depth >= self.config.max_depth || task.tool().is_some() {
            return Plan::single(task);
        }

        let prompt = build_prompt(task, tools, context, self.config.default_strategy);
        let generation = match self.router.generate_text(task, &prompt).await {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(task_id = %task.id(), "Planner generation failed, using single-step plan: {}", e);
                return Plan::single(task);
            }
        };

        match parse_plan(task, &generation.text, tools, self.config.default_strategy) {
            Ok(plan) => {
                tracing::debug!(
                    task_id = %task.id(),
                    subtasks = plan.subtasks.len(),
                    strategy = %plan.strategy,
                    model = %generation.model,
                    "Created plan"
                );
                plan
            }
            Err(reason) => {
                tracing::warn!(task_id = %task.id(), "Discarding generated plan: {}", reason);
                Plan::single(task)
            }
        }
    }
}

fn build_prompt(task: &Task, tools: &[DiscoveredTool], context: &str, default_strategy: ExecutionStrategy) -> String {
    let tool_list = if tools.is_empty() {
        "(none)".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {}: {}", t.descriptor.name, t.descriptor.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let context_section = if context.trim().is_empty() {
        String::new()
    } else {
        format!("\nContext:\n{}\n", context.trim())
    };

    format!(
        r#"You are a task planner. Break down this task into smaller, manageable subtasks.

Task: {description}
{context_section}
Available tools:
{tool_list}

Respond with a JSON object:
{{
    "strategy": "sequential | parallel | hybrid",
    "subtasks": [
        {{
            "id": "1",
            "description": "What to do",
            "priority": "low | normal | high | critical",
            "estimatedEffort": 1.0,
            "dependsOn": [],
            "tool": "optional tool name from the list above",
            "arguments": {{}}
        }}
    ],
    "dependencies": {{ "2": ["1"] }}
}}

Guidelines:
- Each subtask should be independently executable once its dependencies are done
- Only name tools from the list above
- Use "{default_strategy}" unless another strategy clearly fits better
- Keep subtasks focused and specific

Respond ONLY with the JSON object."#,
        description = task.description(),
    )
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// The JSON object inside `response`, with markdown fences stripped.
fn extract_json(response: &str) -> Option<&str> {
    if let Some(inner) = fence_regex()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
    {
        return Some(inner.as_str().trim());
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

/// Parse a model response into a validated plan.
fn parse_plan(
    task: &Task,
    response: &str,
    tools: &[DiscoveredTool],
    default_strategy: ExecutionStrategy,
) -> Result<Plan, String> {
    let raw = extract_json(response).ok_or("no JSON object in response")?;
    let json: Value = serde_json::from_str(raw).map_err(|e| format!("Failed to parse plan: {}", e))?;

    let known_tools: HashSet<&str> = tools.iter().map(|t| t.descriptor.name.as_str()).collect();
    let items = json["subtasks"].as_array().ok_or("missing subtasks array")?;

    let mut seen = HashSet::new();
    let mut subtasks = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let id = match &item["id"] {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => (i + 1).to_string(),
        };
        if !seen.insert(id.clone()) {
            return Err(format!("duplicate subtask id '{}'", id));
        }

        let description = item["description"].as_str().unwrap_or("").trim().to_string();
        if description.is_empty() {
            return Err(format!("subtask '{}' has no description", id));
        }

        let mut subtask = Subtask::new(id, description);
        subtask.priority = item["priority"]
            .as_str()
            .map(TaskPriority::parse_lenient)
            .unwrap_or_else(|| task.priority());
        subtask.estimated_effort = item["estimatedEffort"].as_f64().unwrap_or(1.0).max(0.0);
        subtask.depends_on = string_list(&item["dependsOn"]);

        if let Some(tool) = item["tool"].as_str().map(str::trim).filter(|t| !t.is_empty()) {
            if known_tools.contains(tool) {
                subtask.tool = Some(tool.to_string());
                subtask.arguments = Some(item["arguments"].clone()).filter(|v| !v.is_null());
            } else {
                tracing::debug!(tool, "Ignoring unknown tool in generated plan");
            }
        }
        subtasks.push(subtask);
    }

    if subtasks.is_empty() {
        return Err("no subtasks generated".to_string());
    }

    let strategy = json["strategy"]
        .as_str()
        .map(ExecutionStrategy::parse)
        .unwrap_or(default_strategy);

    let mut plan = Plan::new(task.clone(), subtasks, strategy);
    if let Some(map) = json["dependencies"].as_object() {
        for (id, deps) in map {
            let entry = plan.dependencies.entry(id.clone()).or_default();
            for dep in string_list(deps) {
                if !entry.contains(&dep) {
                    entry.push(dep);
                }
            }
        }
    }

    let validation = validate_plan(&plan);
    if !validation.valid {
        return Err(validation.errors.join("; "));
    }
    Ok(plan)
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
