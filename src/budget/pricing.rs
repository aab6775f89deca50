//! Model pricing and capability ranges.
//!
//! Every routable model declares its per-token prices and the complexity band
//! (`min_complexity..=max_complexity`) it is meant to serve.

use serde::{Deserialize, Serialize};

/// Reference token budget used to compare models by cost.
pub const REFERENCE_INPUT_TOKENS: u64 = 1_000;
pub const REFERENCE_OUTPUT_TOKENS: u64 = 1_000;

/// Pricing and routing information for a single model.
///
/// # Invariants
/// - `min_complexity <= max_complexity`, both within `[0, 100]`
/// - prices are non-negative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model identifier (e.g., "openai/gpt-4o-mini")
    pub id: String,

    /// Id of the provider that serves this model
    pub provider: String,

    /// Display name
    pub name: String,

    /// Cost per 1M input tokens in dollars
    pub input_cost_per_million: f64,

    /// Cost per 1M output tokens in dollars
    pub output_cost_per_million: f64,

    pub min_complexity: f64,
    pub max_complexity: f64,

    /// Context window size in tokens
    pub context_length: u64,
}

impl ModelInfo {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        input_cost_per_million: f64,
        output_cost_per_million: f64,
        complexity: (f64, f64),
    ) -> Self {
        let id = id.into();
        let (lo, hi) = complexity;
        Self {
            name: id.rsplit('/').next().unwrap_or(&id).to_string(),
            id,
            provider: provider.into(),
            input_cost_per_million: input_cost_per_million.max(0.0),
            output_cost_per_million: output_cost_per_million.max(0.0),
            min_complexity: lo.min(hi).clamp(0.0, 100.0),
            max_complexity: hi.max(lo).clamp(0.0, 100.0),
            context_length: 128_000,
        }
    }

    pub fn with_context_length(mut self, context_length: u64) -> Self {
        self.context_length = context_length;
        self
    }

    /// Calculate cost in dollars for given token counts.
    ///
    /// # Formula
    /// `cost = (input * input_rate + output * output_rate) / 1_000_000`
    ///
    /// # Postcondition
    /// `result >= 0`, and the function is pure.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64) * self.input_cost_per_million / 1_000_000.0;
        let output_cost = (output_tokens as f64) * self.output_cost_per_million / 1_000_000.0;
        input_cost + output_cost
    }

    pub fn supports_complexity(&self, complexity: f64) -> bool {
        complexity >= self.min_complexity && complexity <= self.max_complexity
    }

    /// Distance from `complexity` to this model's band (0 when inside).
    pub fn complexity_distance(&self, complexity: f64) -> f64 {
        if complexity < self.min_complexity {
            self.min_complexity - complexity
        } else if complexity > self.max_complexity {
            complexity - self.max_complexity
        } else {
            0.0
        }
    }
}

/// Built-in OpenRouter catalogue. Prices in $ per 1M tokens.
pub fn openrouter_models(provider_id: &str) -> Vec<ModelInfo> {
    let defaults = [
        ("google/gemini-2.0-flash-001", 0.10, 0.40, (0.0, 30.0), 1_000_000),
        ("openai/gpt-4o-mini", 0.15, 0.60, (0.0, 45.0), 128_000),
        ("anthropic/claude-haiku-4.5", 0.80, 4.00, (20.0, 65.0), 200_000),
        ("openai/gpt-4o", 2.50, 10.00, (40.0, 85.0), 128_000),
        ("anthropic/claude-sonnet-4.5", 3.00, 15.00, (55.0, 100.0), 1_000_000),
    ];

    defaults
        .into_iter()
        .map(|(id, input, output, range, context)| {
            ModelInfo::new(id, provider_id, input, output, range).with_context_length(context)
        })
        .collect()
}
