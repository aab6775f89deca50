//! taskpilot - daemon entry point
//!
//! Wires the engine together from environment configuration, schedules the
//! routines file and runs until Ctrl-C.

use std::sync::Arc;

use taskpilot::budget::{BudgetAlert, CostRouter, OpenRouterFactory, ProviderRegistry};
use taskpilot::config::Config;
use taskpilot::context::FileContextProvider;
use taskpilot::engine::{load_routines, TaskEngine};
use taskpilot::mcp::McpManager;
use taskpilot::planner::Planner;
use taskpilot::safety::SafetyGuard;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskpilot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        working_dir = %config.working_dir.display(),
        budget = config.router.budget_usd,
        "Loaded configuration"
    );

    // Providers
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(OpenRouterFactory::new(config.openrouter_api_key.clone())));
    if registry.available().is_empty() {
        warn!("No model provider available (set OPENROUTER_API_KEY); model-backed tasks will fail");
    }

    let router = Arc::new(
        CostRouter::new(config.router.clone(), registry).with_alert_callback(Arc::new(|alert: BudgetAlert| {
            warn!(
                spent = alert.spent,
                budget = alert.budget,
                "Spend crossed {:.0}% of budget",
                alert.threshold * 100.0
            );
        })),
    );
    let planner = Arc::new(Planner::new(config.planner.clone(), Arc::clone(&router)));

    // Tool servers
    let mcp = Arc::new(McpManager::new(config.mcp.clone()));
    if let Some(path) = &config.mcp.config_path {
        if let Err(e) = mcp.load_servers(path).await {
            warn!("Could not load MCP registry {}: {}", path.display(), e);
        }
    }

    let context = Arc::new(FileContextProvider::new(&config.context.dir));
    let mut engine = TaskEngine::new(
        config.engine.clone(),
        Arc::clone(&router),
        planner,
        Arc::clone(&mcp),
        context,
    );

    // Safety guard
    if config.safety.enabled {
        let guard = SafetyGuard::new(&config.safety);
        if config.safety.auto_init {
            match guard.init_repository().await {
                Ok(head) => info!(head = %head, "Repository ready"),
                Err(e) => warn!("Could not initialize repository: {:#}", e),
            }
        }
        engine = engine.with_guard(Arc::new(guard));
    } else {
        warn!("Safety guard disabled; mutating tools run without rollback");
    }

    let engine = Arc::new(engine);
    engine.initialize().await;

    // Routines
    if let Some(path) = &config.engine.routines_path {
        match load_routines(path).await {
            Ok(specs) => {
                for spec in specs {
                    let task = match spec.to_task() {
                        Ok(task) => task,
                        Err(e) => {
                            warn!(cron = %spec.cron, "Skipping routine: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = engine.schedule_routine(&spec.cron, task).await {
                        warn!("Skipping routine '{}': {}", spec.description, e);
                    }
                }
            }
            Err(e) => warn!("Could not load routines {}: {:#}", path.display(), e),
        }
    }

    engine.start().await;
    info!(
        routines = engine.get_scheduled_routines().await.len(),
        "taskpilot running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let stopped = engine.emergency_stop().await;
    if !stopped.is_empty() {
        info!(count = stopped.len(), "Cancelled outstanding tasks");
    }
    engine.stop().await;

    let stats = router.get_cost_stats().await;
    info!(spent = stats.spent, calls = stats.call_count, "Session spend");
    Ok(())
}
