//! Provider plugins.
//!
//! Each backend is a [`ProviderFactory`] registered by id in a
//! [`ProviderRegistry`]. The router only sees factories that report
//! themselves available.

use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{LlmProvider, OpenRouterProvider, TokenUsage};

use super::pricing::{openrouter_models, ModelInfo};

/// Capability interface every provider plugin satisfies.
pub trait ProviderFactory: Send + Sync {
    /// Stable identifier (e.g., "openrouter").
    fn id(&self) -> &str;

    /// Build a client able to serve this provider's models.
    fn create_provider(&self) -> Arc<dyn LlmProvider>;

    /// Models this provider can route to.
    fn get_models(&self) -> Vec<ModelInfo>;

    /// Dollar cost of a call. Must be pure for identical inputs.
    fn calculate_cost(&self, model: &str, usage: TokenUsage) -> f64 {
        self.get_models()
            .iter()
            .find(|m| m.id == model)
            .map(|m| m.calculate_cost(usage.input, usage.output))
            .unwrap_or(0.0)
    }

    /// Whether the provider can currently serve requests.
    fn is_available(&self) -> bool;
}

/// Explicit-registration map of provider factories, keyed by id.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A factory with the same id replaces the previous one.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        let id = factory.id().to_string();
        if self.factories.insert(id.clone(), factory).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderFactory>> {
        self.factories.get(id).cloned()
    }

    /// Factories that report themselves available, in registration order.
    pub fn available(&self) -> Vec<Arc<dyn ProviderFactory>> {
        self.order
            .iter()
            .filter_map(|id| self.factories.get(id))
            .filter(|f| f.is_available())
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// OpenRouter-backed provider plugin.
pub struct OpenRouterFactory {
    api_key: Option<String>,
    models: Vec<ModelInfo>,
}

impl OpenRouterFactory {
    pub const ID: &'static str = "openrouter";

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            models: openrouter_models(Self::ID),
        }
    }
}

impl ProviderFactory for OpenRouterFactory {
    fn id(&self) -> &str {
        Self::ID
    }

    fn create_provider(&self) -> Arc<dyn LlmProvider> {
        Arc::new(OpenRouterProvider::new(self.api_key.clone().unwrap_or_default()))
    }

    fn get_models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}
