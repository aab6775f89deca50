//! Budget-aware model routing.
//!
//! # Algorithm
//! 1. Score the task's complexity
//! 2. Collect models of every available provider whose complexity band
//!    contains the score
//! 3. Pick the one with the lowest cost for the reference token budget
//! 4. If no band matches, degrade to the nearest band (then cheapest)
//!
//! Every completed call is billed into the cost ledger. The budget is advisory:
//! crossing `budget * alert_threshold` fires the alert callback once, but never
//! blocks execution.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::RouterConfig;
use crate::llm::{ChatMessage, LlmError, LlmProvider, StreamChunk, TokenUsage};
use crate::task::Task;

use super::complexity::{ComplexityAnalyzer, ComplexityScore, HeuristicComplexity};
use super::pricing::{ModelInfo, REFERENCE_INPUT_TOKENS, REFERENCE_OUTPUT_TOKENS};
use super::providers::ProviderRegistry;

/// Outcome of routing a task to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRoutingResult {
    pub model: String,
    pub provider: String,
    /// Complexity total the decision was made for
    pub complexity: f64,
    /// Cost of the reference token budget on this model, in dollars
    pub estimated_cost: f64,
    pub model_info: ModelInfo,
}

/// One billed model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub estimated_cost: f64,
    pub complexity: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpend {
    pub calls: usize,
    pub cost: f64,
}

/// Snapshot of the cost ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostStats {
    pub spent: f64,
    pub budget: f64,
    pub remaining: f64,
    pub alert_threshold: f64,
    pub call_count: usize,
    pub by_model: BTreeMap<String, ModelSpend>,
}

/// Passed to the alert callback when spend crosses the alert line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetAlert {
    pub spent: f64,
    pub budget: f64,
    pub threshold: f64,
}

pub type BudgetAlertCallback = Arc<dyn Fn(BudgetAlert) + Send + Sync>;

/// Text produced by a routed call, with its billing.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub cost: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("No providers loaded")]
    NoProvidersLoaded,

    #[error("No models available from loaded providers")]
    NoModelsAvailable,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),
}

#[derive(Default)]
struct CostLedger {
    spent: f64,
    history: Vec<CostHistoryEntry>,
}

/// Routes tasks to models and keeps the spend ledger.
pub struct CostRouter {
    config: RouterConfig,
    registry: ProviderRegistry,
    analyzer: Arc<dyn ComplexityAnalyzer>,
    providers: Mutex<HashMap<String, Arc<dyn LlmProvider>>>,
    ledger: Mutex<CostLedger>,
    on_alert: Option<BudgetAlertCallback>,
}

impl CostRouter {
    pub fn new(config: RouterConfig, registry: ProviderRegistry) -> Self {
        Self {
            config,
            registry,
            analyzer: Arc::new(HeuristicComplexity::new()),
            providers: Mutex::new(HashMap::new()),
            ledger: Mutex::new(CostLedger::default()),
            on_alert: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ComplexityAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_alert_callback(mut self, callback: BudgetAlertCallback) -> Self {
        self.on_alert = Some(callback);
        self
    }

    pub fn analyze_complexity(&self, task: &Task) -> ComplexityScore {
        self.analyzer.analyze(task)
    }

    /// Route a task by its complexity.
    pub fn route(&self, task: &Task) -> Result<ModelRoutingResult, RouterError> {
        let score = self.analyze_complexity(task);
        tracing::debug!(
            task_id = %task.id(),
            lexical = score.lexical,
            semantic = score.semantic,
            scope = score.scope,
            total = score.total,
            "Scored task complexity"
        );
        self.route_for_complexity(score.total)
    }

    /// Pick the cheapest model whose complexity band contains `complexity`.
    pub fn route_for_complexity(&self, complexity: f64) -> Result<ModelRoutingResult, RouterError> {
        let providers = self.registry.available();
        if providers.is_empty() {
            return Err(RouterError::NoProvidersLoaded);
        }

        // rank by what the owning provider will bill for the reference budget
        let reference = TokenUsage::new(REFERENCE_INPUT_TOKENS, REFERENCE_OUTPUT_TOKENS);
        let candidates: Vec<(ModelInfo, f64)> = providers
            .iter()
            .flat_map(|p| {
                p.get_models().into_iter().map(move |m| {
                    let cost = p.calculate_cost(&m.id, reference);
                    (m, cost)
                })
            })
            .collect();
        if candidates.is_empty() {
            return Err(RouterError::NoModelsAvailable);
        }

        let by_cost = |a: &&(ModelInfo, f64), b: &&(ModelInfo, f64)| {
            a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id))
        };

        let (chosen, estimated_cost) = match candidates
            .iter()
            .filter(|(m, _)| m.supports_complexity(complexity))
            .min_by(by_cost)
        {
            Some(candidate) => candidate,
            None => {
                let nearest = candidates
                    .iter()
                    .min_by(|a, b| {
                        a.0.complexity_distance(complexity)
                            .total_cmp(&b.0.complexity_distance(complexity))
                            .then_with(|| by_cost(a, b))
                    })
                    .ok_or(RouterError::NoModelsAvailable)?;
                tracing::warn!(
                    complexity,
                    model = %nearest.0.id,
                    "No model covers complexity, using nearest band"
                );
                nearest
            }
        };

        Ok(ModelRoutingResult {
            model: chosen.id.clone(),
            provider: chosen.provider.clone(),
            complexity,
            estimated_cost: *estimated_cost,
            model_info: chosen.clone(),
        })
    }

    /// Route `task`, generate text for `prompt`, and bill the call.
    pub async fn generate_text(&self, task: &Task, prompt: &str) -> Result<Generation, RouterError> {
        let routing = self.route(task)?;
        let provider = self.provider_for(&routing.provider).await?;
        let messages = [ChatMessage::user(prompt)];

        let completion = provider.generate(&routing.model, &messages).await?;
        let cost = self.record_usage(&routing, completion.usage).await;

        Ok(Generation {
            text: completion.text,
            model: routing.model,
            provider: routing.provider,
            usage: completion.usage,
            cost,
        })
    }

    /// Streaming variant of [`generate_text`](Self::generate_text).
    ///
    /// The call is billed when the provider's usage report arrives at the end of
    /// the stream. A stream dropped early is not billed.
    pub async fn stream_text(
        self: &Arc<Self>,
        task: &Task,
        prompt: &str,
    ) -> Result<BoxStream<'static, Result<String, RouterError>>, RouterError> {
        let routing = self.route(task)?;
        let provider = self.provider_for(&routing.provider).await?;
        let mut chunks = provider
            .stream(&routing.model, &[ChatMessage::user(prompt)])
            .await?;
        let router = Arc::clone(self);

        let stream = async_stream::try_stream! {
            let mut usage = TokenUsage::default();
            while let Some(chunk) = chunks.next().await {
                match chunk? {
                    StreamChunk::Text(text) => yield text,
                    StreamChunk::Usage(reported) => usage = reported,
                }
            }
            router.record_usage(&routing, usage).await;
        };

        Ok(stream.boxed())
    }

    async fn provider_for(&self, provider_id: &str) -> Result<Arc<dyn LlmProvider>, RouterError> {
        let mut providers = self.providers.lock().await;
        if let Some(provider) = providers.get(provider_id) {
            return Ok(Arc::clone(provider));
        }
        let factory = self
            .registry
            .get(provider_id)
            .ok_or_else(|| RouterError::UnknownProvider(provider_id.to_string()))?;
        let provider = factory.create_provider();
        providers.insert(provider_id.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    async fn record_usage(&self, routing: &ModelRoutingResult, usage: TokenUsage) -> f64 {
        let cost = self
            .registry
            .get(&routing.provider)
            .map(|f| f.calculate_cost(&routing.model, usage))
            .unwrap_or(0.0);

        let alert_line = self.config.budget_usd * self.config.alert_threshold;
        let alert = {
            let mut ledger = self.ledger.lock().await;
            let previous = ledger.spent;
            ledger.spent += cost;
            ledger.history.push(CostHistoryEntry {
                timestamp: Utc::now(),
                model: routing.model.clone(),
                provider: routing.provider.clone(),
                estimated_cost: cost,
                complexity: routing.complexity,
                input_tokens: usage.input,
                output_tokens: usage.output,
            });
            (previous < alert_line && ledger.spent >= alert_line).then(|| BudgetAlert {
                spent: ledger.spent,
                budget: self.config.budget_usd,
                threshold: self.config.alert_threshold,
            })
        };

        tracing::debug!(model = %routing.model, cost, "Recorded model usage");

        if let Some(alert) = alert {
            tracing::warn!(
                spent = alert.spent,
                budget = alert.budget,
                threshold = alert.threshold,
                "Budget alert threshold crossed"
            );
            if let Some(callback) = &self.on_alert {
                if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                    tracing::error!("Budget alert callback panicked");
                }
            }
        }

        cost
    }

    pub async fn get_cost_stats(&self) -> CostStats {
        let ledger = self.ledger.lock().await;
        let mut by_model: BTreeMap<String, ModelSpend> = BTreeMap::new();
        for entry in &ledger.history {
            let spend = by_model.entry(entry.model.clone()).or_default();
            spend.calls += 1;
            spend.cost += entry.estimated_cost;
        }
        CostStats {
            spent: ledger.spent,
            budget: self.config.budget_usd,
            remaining: (self.config.budget_usd - ledger.spent).max(0.0),
            alert_threshold: self.config.alert_threshold,
            call_count: ledger.history.len(),
            by_model,
        }
    }

    /// Models of every available provider.
    pub fn get_available_models(&self) -> Vec<ModelInfo> {
        self.registry
            .available()
            .iter()
            .flat_map(|p| p.get_models())
            .collect()
    }

    /// Reset spend and history. Re-arms the budget alert.
    pub async fn clear_cost_history(&self) {
        let mut ledger = self.ledger.lock().await;
        ledger.spent = 0.0;
        ledger.history.clear();
        tracing::info!("Cleared cost history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::testing::{sample_models, FakeFactory, FakeProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn router_with(models: Vec<ModelInfo>, config: RouterConfig) -> (CostRouter, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider::new("done"));
        let factory = FakeFactory::new("fake", models).with_provider(Arc::clone(&provider));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(factory));
        (CostRouter::new(config, registry), provider)
    }

    fn config(budget_usd: f64, alert_threshold: f64) -> RouterConfig {
        RouterConfig {
            budget_usd,
            alert_threshold,
        }
    }

    #[test]
    fn test_route_picks_cheapest_covering_model() {
        let (router, _) = router_with(sample_models("fake"), config(10.0, 0.8));
        assert_eq!(router.route_for_complexity(15.0).unwrap().model, "tiny");
        assert_eq!(router.route_for_complexity(25.0).unwrap().model, "small");
        let high = router.route_for_complexity(90.0).unwrap();
        assert_eq!(high.model, "large");
        assert_eq!(high.provider, "fake");
        let reference = high
            .model_info
            .calculate_cost(REFERENCE_INPUT_TOKENS, REFERENCE_OUTPUT_TOKENS);
        assert!((high.estimated_cost - reference).abs() < 1e-12);
    }

    #[test]
    fn test_route_ranks_by_provider_billing() {
        // catalogue says "large" is the most expensive, the provider bills it at zero
        let factory = FakeFactory::new("fake", sample_models("fake")).with_flat_price("large", 0.0);
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(factory));
        let router = CostRouter::new(config(10.0, 0.8), registry);

        let routed = router.route_for_complexity(15.0).unwrap();
        assert_eq!(routed.model, "large");
        assert_eq!(routed.estimated_cost, 0.0);
    }

    struct FixedComplexity(f64);

    impl ComplexityAnalyzer for FixedComplexity {
        fn analyze(&self, _task: &Task) -> ComplexityScore {
            ComplexityScore {
                lexical: self.0,
                semantic: self.0,
                scope: self.0,
                total: self.0,
            }
        }
    }

    #[test]
    fn test_injected_analyzer_drives_routing() {
        let (router, _) = router_with(sample_models("fake"), config(10.0, 0.8));
        let router = router.with_analyzer(Arc::new(FixedComplexity(90.0)));
        let task = Task::new("rename a variable").unwrap();

        assert_eq!(router.analyze_complexity(&task).total, 90.0);
        let routed = router.route(&task).unwrap();
        assert_eq!(routed.model, "large");
        assert_eq!(routed.complexity, 90.0);
    }

    #[test]
    fn test_route_degrades_to_nearest_band() {
        let models = vec![
            ModelInfo::new("low", "fake", 0.1, 0.1, (0.0, 10.0)),
            ModelInfo::new("high", "fake", 1.0, 1.0, (50.0, 100.0)),
        ];
        let (router, _) = router_with(models, config(10.0, 0.8));
        assert_eq!(router.route_for_complexity(40.0).unwrap().model, "high");
        assert_eq!(router.route_for_complexity(20.0).unwrap().model, "low");
        // equidistant: cheaper wins
        assert_eq!(router.route_for_complexity(30.0).unwrap().model, "low");
    }

    #[test]
    fn test_no_providers_loaded() {
        let router = CostRouter::new(config(1.0, 0.8), ProviderRegistry::new());
        assert!(matches!(
            router.route_for_complexity(15.0),
            Err(RouterError::NoProvidersLoaded)
        ));

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeFactory::new("off", sample_models("off")).unavailable()));
        let router = CostRouter::new(config(1.0, 0.8), registry);
        assert!(matches!(
            router.route(&Task::new("anything").unwrap()),
            Err(RouterError::NoProvidersLoaded)
        ));
        assert!(router.get_available_models().is_empty());
    }

    #[tokio::test]
    async fn test_generate_records_cost() {
        let (router, provider) = router_with(sample_models("fake"), config(10.0, 0.8));
        let task = Task::new("list files").unwrap();
        let generation = router.generate_text(&task, "hello").await.unwrap();
        assert_eq!(generation.text, "done");
        assert_eq!(provider.call_count(), 1);

        let stats = router.get_cost_stats().await;
        assert_eq!(stats.call_count, 1);
        assert!((stats.spent - generation.cost).abs() < 1e-12);
        assert_eq!(stats.by_model[&generation.model].calls, 1);
        assert!(stats.remaining < 10.0);
    }

    #[tokio::test]
    async fn test_provider_error_is_not_billed() {
        let (router, provider) = router_with(sample_models("fake"), config(10.0, 0.8));
        provider.push(Err(LlmError::server_error(500, "down")));
        let task = Task::new("list files").unwrap();
        let err = router.generate_text(&task, "x").await.unwrap_err();
        assert!(matches!(err, RouterError::Provider(_)));
        assert_eq!(router.get_cost_stats().await.call_count, 0);
    }

    #[tokio::test]
    async fn test_alert_fires_once_per_crossing() {
        // each call costs 1000/1M * 1.0 + 1000/1M * 1.0 = 0.002
        let models = vec![ModelInfo::new("flat", "fake", 1.0, 1.0, (0.0, 100.0))];
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let (router, _) = router_with(models, config(0.01, 0.5));
        let router = router.with_alert_callback(Arc::new(move |alert: BudgetAlert| {
            assert!(alert.spent >= alert.budget * alert.threshold);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let task = Task::new("anything").unwrap();

        let mut last_spent = 0.0;
        for _ in 0..5 {
            router.generate_text(&task, "x").await.unwrap();
            let spent = router.get_cost_stats().await.spent;
            assert!(spent >= last_spent);
            last_spent = spent;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        router.clear_cost_history().await;
        assert_eq!(router.get_cost_stats().await.spent, 0.0);
        for _ in 0..3 {
            router.generate_text(&task, "x").await.unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_alert_callback_is_contained() {
        let models = vec![ModelInfo::new("flat", "fake", 1.0, 1.0, (0.0, 100.0))];
        let (router, _) = router_with(models, config(0.001, 0.5));
        let router = router.with_alert_callback(Arc::new(|_| panic!("callback bug")));
        let task = Task::new("anything").unwrap();
        assert!(router.generate_text(&task, "x").await.is_ok());
        assert_eq!(router.get_cost_stats().await.call_count, 1);
    }

    #[tokio::test]
    async fn test_stream_text_bills_on_completion() {
        let (router, _) = router_with(sample_models("fake"), config(10.0, 0.8));
        let router = Arc::new(router);
        let task = Task::new("list files").unwrap();
        let stream = router.stream_text(&task, "x").await.unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts.concat(), "done");
        assert_eq!(router.get_cost_stats().await.call_count, 1);
    }
}
