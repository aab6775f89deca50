//! Task complexity scoring.
//!
//! A score has three sub-scores (lexical, semantic, scope), each in `[0, 100]`,
//! and a clamped weighted `total` that drives routing. The scoring function is
//! pluggable through [`ComplexityAnalyzer`]; the shape of the score is not.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::task::{Task, TaskPriority};

const LEXICAL_WEIGHT: f64 = 0.30;
const SEMANTIC_WEIGHT: f64 = 0.45;
const SCOPE_WEIGHT: f64 = 0.25;

/// Complexity estimate for a task.
///
/// # Invariants
/// - every field is within `[0, 100]`
/// - `total == clamp(0.3 * lexical + 0.45 * semantic + 0.25 * scope)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    pub lexical: f64,
    pub semantic: f64,
    pub scope: f64,
    pub total: f64,
}

impl ComplexityScore {
    pub fn from_parts(lexical: f64, semantic: f64, scope: f64) -> Self {
        let lexical = clamp_score(lexical);
        let semantic = clamp_score(semantic);
        let scope = clamp_score(scope);
        let total = clamp_score(
            LEXICAL_WEIGHT * lexical + SEMANTIC_WEIGHT * semantic + SCOPE_WEIGHT * scope,
        );
        Self {
            lexical,
            semantic,
            scope,
            total,
        }
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Replaceable complexity heuristic.
pub trait ComplexityAnalyzer: Send + Sync {
    fn analyze(&self, task: &Task) -> ComplexityScore;
}

/// Keyword- and length-based default analyzer.
#[derive(Debug, Default, Clone)]
pub struct HeuristicComplexity;

/// Words that usually mean design work or cross-cutting changes.
const HEAVY_TERMS: &[&str] = &[
    "architect",
    "design",
    "refactor",
    "migrat",
    "distributed",
    "concurren",
    "security",
    "optimi",
    "performance",
    "implement",
    "integrat",
    "algorithm",
    "database",
    "scalab",
    "rewrite",
];

const MEDIUM_TERMS: &[&str] = &[
    "analy", "research", "test", "debug", "investigat", "build", "deploy", "review", "fix",
];

/// Words that usually mean a small mechanical change or a lookup.
const LIGHT_TERMS: &[&str] = &[
    "typo", "rename", "list", "print", "echo", "format", "simple", "trivial", "hello", "read",
    "show", "check",
];

/// Phrases hinting at several steps.
const STEP_MARKERS: &[&str] = &["then", "after", "each", "every", "all", "across", "both"];

fn code_marker_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```|`[^`]+`|::|\(\)|=>|\b[\w-]+\.(rs|py|ts|js|go|toml|json|ya?ml|md|sh)\b")
            .ok()
    })
    .as_ref()
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn count_matching(words: &[String], terms: &[&str]) -> usize {
    words
        .iter()
        .filter(|w| terms.iter().any(|t| w.starts_with(t)))
        .count()
}

impl HeuristicComplexity {
    pub fn new() -> Self {
        Self
    }

    fn lexical(&self, description: &str) -> f64 {
        let word_count = description.split_whitespace().count() as f64;
        let sentences = description
            .split(|c| matches!(c, '.' | '!' | '?' | '\n'))
            .filter(|s| !s.trim().is_empty())
            .count() as f64;
        let code_markers = code_marker_regex()
            .map(|re| re.find_iter(description).count())
            .unwrap_or(0) as f64;

        word_count * 1.2 + sentences * 4.0 + code_markers * 8.0
    }

    fn semantic(&self, words: &[String]) -> f64 {
        let heavy = count_matching(words, HEAVY_TERMS) as f64;
        let medium = count_matching(words, MEDIUM_TERMS) as f64;
        let light = count_matching(words, LIGHT_TERMS) as f64;

        30.0 + heavy * 12.0 + medium * 6.0 - light * 10.0
    }

    fn scope(&self, task: &Task, words: &[String]) -> f64 {
        let priority = match task.priority() {
            TaskPriority::Low => 5.0,
            TaskPriority::Normal => 15.0,
            TaskPriority::High => 30.0,
            TaskPriority::Critical => 45.0,
        };

        let breadth = match task.parameters() {
            Some(Value::Object(map)) => (map.len() as f64 * 5.0).min(30.0),
            Some(Value::Array(items)) => (items.len() as f64 * 5.0).min(30.0),
            Some(Value::Null) | None => 0.0,
            Some(_) => 5.0,
        };

        let tool = if task.tool().is_some() { 10.0 } else { 0.0 };
        let steps = (count_matching(words, STEP_MARKERS) as f64 * 5.0).min(20.0);

        priority + breadth + tool + steps
    }
}

impl ComplexityAnalyzer for HeuristicComplexity {
    fn analyze(&self, task: &Task) -> ComplexityScore {
        let description = task.description();
        let words = words(description);
        ComplexityScore::from_parts(
            self.lexical(description),
            self.semantic(&words),
            self.scope(task, &words),
        )
    }
}
