//! Budget module - complexity scoring, model pricing and cost-aware routing.
//!
//! # Key Concepts
//! - Complexity: a `[0, 100]` estimate of how demanding a task is
//! - Pricing: per-model token prices and the complexity band each model serves
//! - Providers: explicitly registered backend plugins
//! - Router: picks the cheapest suitable model and tracks spend against a budget

mod complexity;
mod pricing;
mod providers;
mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use complexity::{ComplexityAnalyzer, ComplexityScore, HeuristicComplexity};
pub use pricing::{openrouter_models, ModelInfo, REFERENCE_INPUT_TOKENS, REFERENCE_OUTPUT_TOKENS};
pub use providers::{OpenRouterFactory, ProviderFactory, ProviderRegistry};
pub use router::{
    BudgetAlert, BudgetAlertCallback, CostHistoryEntry, CostRouter, CostStats, Generation,
    ModelRoutingResult, ModelSpend, RouterError,
};
