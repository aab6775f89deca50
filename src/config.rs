//! Configuration management for taskpilot.
//!
//! Configuration is read from environment variables:
//! - `WORKING_DIR` - Optional. Base directory for relative paths. Defaults to current directory.
//! - `OPENROUTER_API_KEY` - Optional. Enables the OpenRouter provider.
//! - `BUDGET_USD` - Optional. Advisory spend budget. Defaults to `10.0`.
//! - `BUDGET_ALERT_THRESHOLD` - Optional. Fraction of budget that triggers the alert. Defaults to `0.8`.
//! - `PLANNER_ENABLED` - Optional. Enable LLM decomposition. Defaults to `true`.
//! - `PLANNER_MAX_DEPTH` - Optional. Maximum decomposition depth. Defaults to `2`.
//! - `PLANNER_STRATEGY` - Optional. `sequential`, `parallel` or `hybrid`. Defaults to `sequential`.
//! - `PLANNER_TRIVIAL_THRESHOLD` - Optional. Complexity below which planning is skipped. Defaults to `25`.
//! - `MCP_CONFIG_PATH` - Optional. Tool server registry (JSON or YAML).
//! - `MCP_CONNECT_ATTEMPTS` - Optional. Connection attempts per server. Defaults to `3`.
//! - `MCP_RETRY_DELAY_MS` - Optional. Delay between attempts. Defaults to `1000`.
//! - `SAFETY_ENABLED` - Optional. Guard mutating tools with git transactions. Defaults to `true`.
//! - `SAFETY_REPO_ROOT` - Optional. Repository the guard protects. Defaults to `WORKING_DIR`.
//! - `SAFETY_DIRTY_STRATEGY` - Optional. `fail` or `auto_stash`. Defaults to `fail`.
//! - `SAFETY_AUDIT_DIR` - Optional. Audit log directory, outside the guarded work tree. Defaults to `<repo>/.git/taskpilot/audit`.
//! - `SAFETY_AUTO_INIT` - Optional. Initialize the repository at startup. Defaults to `false`.
//! - `SCHEDULER_TICK_MS` - Optional. Cron dispatch tick. Defaults to `1000`.
//! - `ROUTINES_PATH` - Optional. JSON file of routines to schedule at startup.
//! - `CONTEXT_DIR` - Optional. Context provider directory, outside the guarded work tree when the
//!   guard is enabled. Defaults to `<repo>/.git/taskpilot/context`, or `<WORKING_DIR>/.taskpilot/context`
//!   with the guard disabled.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::planner::ExecutionStrategy;
use crate::safety::{in_work_tree, state_dir, DirtyTreeStrategy};
use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Spend tracking for the cost router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub budget_usd: f64,
    /// Fraction of `budget_usd` at which the alert fires
    pub alert_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            budget_usd: 10.0,
            alert_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub enabled: bool,
    pub max_depth: u32,
    pub default_strategy: ExecutionStrategy,
    /// Tasks scoring below this skip decomposition
    pub trivial_threshold: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 2,
            default_strategy: ExecutionStrategy::Sequential,
            trivial_threshold: 25.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpConfig {
    pub config_path: Option<PathBuf>,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            connect_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub enabled: bool,
    pub repo_root: PathBuf,
    pub dirty_strategy: DirtyTreeStrategy,
    pub audit_dir: Option<PathBuf>,
    pub auto_init: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_root: PathBuf::from("."),
            dirty_strategy: DirtyTreeStrategy::Fail,
            audit_dir: None,
            auto_init: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the dispatch loop checks for due routines
    pub tick_interval: Duration,
    pub routines_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            routines_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub dir: PathBuf,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".taskpilot").join("context"),
        }
    }
}

impl ContextConfig {
    /// Default location for a workspace: next to the audit log when the guard
    /// is on, so context writes never dirty the guarded tree.
    pub fn for_workspace(working_dir: &Path, safety: &SafetyConfig) -> Self {
        if safety.enabled {
            Self {
                dir: state_dir(&safety.repo_root).join("context"),
            }
        } else {
            Self {
                dir: working_dir.join(Self::default().dir),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub working_dir: PathBuf,
    pub openrouter_api_key: Option<String>,
    pub router: RouterConfig,
    pub planner: PlannerConfig,
    pub mcp: McpConfig,
    pub safety: SafetyConfig,
    pub engine: EngineConfig,
    pub context: ContextConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric or enum variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let working_dir = std::env::var("WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let openrouter_api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let router = RouterConfig {
            budget_usd: parse_env("BUDGET_USD", 10.0)?,
            alert_threshold: parse_env("BUDGET_ALERT_THRESHOLD", 0.8)?,
        };
        if !(0.0..=1.0).contains(&router.alert_threshold) {
            return Err(ConfigError::InvalidValue(
                "BUDGET_ALERT_THRESHOLD".to_string(),
                "must be between 0 and 1".to_string(),
            ));
        }

        let planner = PlannerConfig {
            enabled: env_var_bool("PLANNER_ENABLED", true),
            max_depth: parse_env("PLANNER_MAX_DEPTH", 2)?,
            // unknown strategies degrade to sequential
            default_strategy: std::env::var("PLANNER_STRATEGY")
                .map(|s| ExecutionStrategy::parse(&s))
                .unwrap_or_default(),
            trivial_threshold: parse_env("PLANNER_TRIVIAL_THRESHOLD", 25.0)?,
        };

        let mcp = McpConfig {
            config_path: path_env("MCP_CONFIG_PATH", &working_dir),
            connect_attempts: parse_env("MCP_CONNECT_ATTEMPTS", 3)?,
            retry_delay: Duration::from_millis(parse_env("MCP_RETRY_DELAY_MS", 1000)?),
        };

        let dirty_strategy = match std::env::var("SAFETY_DIRTY_STRATEGY") {
            Ok(value) => DirtyTreeStrategy::from_str(&value)
                .map_err(|e| ConfigError::InvalidValue("SAFETY_DIRTY_STRATEGY".to_string(), e))?,
            Err(_) => DirtyTreeStrategy::Fail,
        };
        let safety = SafetyConfig {
            enabled: env_var_bool("SAFETY_ENABLED", true),
            repo_root: path_env("SAFETY_REPO_ROOT", &working_dir).unwrap_or_else(|| working_dir.clone()),
            dirty_strategy,
            audit_dir: path_env("SAFETY_AUDIT_DIR", &working_dir),
            auto_init: env_var_bool("SAFETY_AUTO_INIT", false),
        };

        let engine = EngineConfig {
            tick_interval: Duration::from_millis(parse_env::<u64>("SCHEDULER_TICK_MS", 1000)?.max(10)),
            routines_path: path_env("ROUTINES_PATH", &working_dir),
        };

        let context = match path_env("CONTEXT_DIR", &working_dir) {
            Some(dir) => ContextConfig { dir },
            None => ContextConfig::for_workspace(&working_dir, &safety),
        };
        check_state_dirs(&safety, &context)?;

        Ok(Self {
            working_dir,
            openrouter_api_key,
            router,
            planner,
            mcp,
            safety,
            engine,
            context,
        })
    }

    /// Create a config rooted at `working_dir` with defaults everywhere else (useful for testing).
    pub fn new(working_dir: PathBuf) -> Self {
        let safety = SafetyConfig {
            repo_root: working_dir.clone(),
            ..SafetyConfig::default()
        };
        Self {
            openrouter_api_key: None,
            router: RouterConfig::default(),
            planner: PlannerConfig::default(),
            mcp: McpConfig::default(),
            context: ContextConfig::for_workspace(&working_dir, &safety),
            safety,
            engine: EngineConfig::default(),
            working_dir,
        }
    }
}

/// Files written by taskpilot itself must stay out of the guarded work tree.
fn check_state_dirs(safety: &SafetyConfig, context: &ContextConfig) -> Result<(), ConfigError> {
    if !safety.enabled {
        return Ok(());
    }
    let inside = |name: &str, dir: &Path| {
        ConfigError::InvalidValue(
            name.to_string(),
            format!(
                "{} is inside the guarded work tree {}",
                dir.display(),
                safety.repo_root.display()
            ),
        )
    };
    if let Some(dir) = &safety.audit_dir {
        if in_work_tree(dir, &safety.repo_root) {
            return Err(inside("SAFETY_AUDIT_DIR", dir));
        }
    }
    if in_work_tree(&context.dir, &safety.repo_root) {
        return Err(inside("CONTEXT_DIR", &context.dir));
    }
    Ok(())
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        _ => Ok(default),
    }
}

/// Read a path variable, resolving relative values against `base`.
fn path_env(name: &str, base: &Path) -> Option<PathBuf> {
    let value = std::env::var(name).ok().filter(|v| !v.trim().is_empty())?;
    let path = PathBuf::from(value.trim());
    Some(if path.is_absolute() { path } else { base.join(path) })
}
