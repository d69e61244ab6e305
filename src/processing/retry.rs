//! Quality retry ladder.
//!
//! Each attempt runs with an immutable [`StrategyParams`] value; [`escalate`] derives the next
//! one from the previous one and the 1-based retry number:
//!
//! 1. unchanged (a fresh sample from the same model),
//! 2. switch to the upgrade model,
//! 3. grow the token budget.

use super::types::ChunkingConfig;

/// Retries allowed after the original attempt.
pub const MAX_RETRIES: u32 = 3;

/// Model and token budget used for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyParams {
    /// Completion model for chunk summaries.
    pub model: String,
    /// Token budget the hierarchical run compresses towards.
    pub token_budget: usize,
}

impl StrategyParams {
    /// Chunking configuration for an attempt using these parameters.
    pub fn apply(&self, base: &ChunkingConfig) -> ChunkingConfig {
        ChunkingConfig {
            model: self.model.clone(),
            target_tokens: self.token_budget,
            ..base.clone()
        }
    }
}

/// Knobs for the escalation ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    /// Model used from retry #2 onwards.
    pub upgrade_model: String,
    /// Multiplier applied to the token budget on retry #3.
    pub token_budget_growth: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            upgrade_model: "llama3.1:70b".into(),
            token_budget_growth: 1.25,
        }
    }
}

/// Parameters for the next attempt and the human-readable change, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    /// Parameters the retry runs with.
    pub params: StrategyParams,
    /// Description such as `model: a → b`; `None` when nothing changed.
    pub change: Option<String>,
}

/// Derive the parameters for retry `retry_number` (1-based) from the previous attempt's.
pub fn escalate(
    params: &StrategyParams,
    retry_number: u32,
    policy: &EscalationPolicy,
) -> Escalation {
    match retry_number {
        2 if params.model != policy.upgrade_model => Escalation {
            params: StrategyParams {
                model: policy.upgrade_model.clone(),
                ..params.clone()
            },
            change: Some(format!(
                "model: {} → {}",
                params.model, policy.upgrade_model
            )),
        },
        3 => {
            let grown = (params.token_budget as f64 * policy.token_budget_growth).ceil() as usize;
            let token_budget = grown.max(params.token_budget);
            let change = (token_budget != params.token_budget).then(|| {
                format!(
                    "max_tokens: {} → {}",
                    format_token_budget(params.token_budget),
                    format_token_budget(token_budget)
                )
            });
            Escalation {
                params: StrategyParams {
                    token_budget,
                    ..params.clone()
                },
                change,
            }
        }
        _ => Escalation {
            params: params.clone(),
            change: None,
        },
    }
}

/// Render a budget as `200K`, `62.5K`, or a plain number below one thousand.
pub fn format_token_budget(tokens: usize) -> String {
    if tokens < 1_000 {
        tokens.to_string()
    } else if tokens % 1_000 == 0 {
        format!("{}K", tokens / 1_000)
    } else {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    }
}
