//! Scripted provider doubles shared by router, planner and engine tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::llm::{ChatMessage, Completion, LlmError, LlmProvider, TokenUsage};

use super::pricing::ModelInfo;
use super::providers::ProviderFactory;

/// Provider that replays queued responses, then falls back to a default text.
pub struct FakeProvider {
    queued: Mutex<VecDeque<Result<String, LlmError>>>,
    default_text: String,
    usage: TokenUsage,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeProvider {
    pub fn new(default_text: impl Into<String>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default_text: default_text.into(),
            usage: TokenUsage::new(1_000, 1_000),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn push(&self, response: Result<String, LlmError>) {
        self.queued.lock().unwrap().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    async fn generate(&self, model: &str, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.calls.lock().unwrap().push((model.to_string(), prompt));
        let next = self.queued.lock().unwrap().pop_front();
        let text = match next {
            Some(result) => result?,
            None => self.default_text.clone(),
        };
        Ok(Completion {
            text,
            usage: self.usage,
        })
    }
}

pub struct FakeFactory {
    id: String,
    models: Vec<ModelInfo>,
    pub provider: Arc<FakeProvider>,
    available: bool,
    /// Flat per-call prices that replace the catalogue pricing
    flat_prices: HashMap<String, f64>,
}

impl FakeFactory {
    pub fn new(id: &str, models: Vec<ModelInfo>) -> Self {
        Self {
            id: id.to_string(),
            models,
            provider: Arc::new(FakeProvider::new("ok")),
            available: true,
            flat_prices: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<FakeProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_flat_price(mut self, model: &str, cost: f64) -> Self {
        self.flat_prices.insert(model.to_string(), cost);
        self
    }
}

impl ProviderFactory for FakeFactory {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_provider(&self) -> Arc<dyn LlmProvider> {
        self.provider.clone()
    }

    fn get_models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }

    fn calculate_cost(&self, model: &str, usage: TokenUsage) -> f64 {
        if let Some(cost) = self.flat_prices.get(model) {
            return *cost;
        }
        self.models
            .iter()
            .find(|m| m.id == model)
            .map(|m| m.calculate_cost(usage.input, usage.output))
            .unwrap_or(0.0)
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

/// Three non-overlapping-price models spanning `[0, 100]` with an overlap at 15.
pub fn sample_models(provider: &str) -> Vec<ModelInfo> {
    vec![
        ModelInfo::new("small", provider, 0.5, 1.0, (0.0, 30.0)),
        ModelInfo::new("tiny", provider, 0.1, 0.2, (0.0, 20.0)),
        ModelInfo::new("large", provider, 5.0, 20.0, (10.0, 100.0)),
    ]
}
