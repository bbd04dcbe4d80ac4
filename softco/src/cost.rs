//! Token and spend accounting against a run budget.

use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Price per 1000 tokens, in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub prompt: f64,
    pub completion: f64,
}

/// Model used when a name matches nothing in [`PRICING`].
pub const DEFAULT_PRICE_TIER: &str = "gpt-4-turbo";

/// Known models.
const PRICING: &[(&str, ModelPrice)] = &[
    ("gpt-4o-mini", ModelPrice { prompt: 0.00015, completion: 0.0006 }),
    ("gpt-4o", ModelPrice { prompt: 0.005, completion: 0.015 }),
    ("gpt-4-turbo", ModelPrice { prompt: 0.01, completion: 0.03 }),
    ("gpt-4", ModelPrice { prompt: 0.03, completion: 0.06 }),
    ("gpt-3.5-turbo", ModelPrice { prompt: 0.0005, completion: 0.0015 }),
    ("claude-opus-4", ModelPrice { prompt: 0.015, completion: 0.075 }),
    ("claude-sonnet-4", ModelPrice { prompt: 0.003, completion: 0.015 }),
    ("claude-3-5-haiku", ModelPrice { prompt: 0.0008, completion: 0.004 }),
];

/// Look up the price for a model: exact match first, then the longest table
/// entry the name starts with, then the default tier.
pub fn price_for(model: &str) -> ModelPrice {
    if let Some((_, price)) = PRICING.iter().find(|(name, _)| *name == model) {
        return *price;
    }
    if let Some((_, price)) = PRICING
        .iter()
        .filter(|(name, _)| model.starts_with(name))
        .max_by_key(|(name, _)| name.len())
    {
        return *price;
    }
    PRICING
        .iter()
        .find(|(name, _)| *name == DEFAULT_PRICE_TIER)
        .map(|(_, price)| *price)
        .unwrap_or(ModelPrice { prompt: 0.01, completion: 0.03 })
}

/// Cumulative usage for one run. Counters only ever grow.
#[derive(Debug, Clone, PartialEq)]
pub struct CostLedger {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost: f64,
    pub max_budget: f64,
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl CostLedger {
    pub fn new(max_budget: f64) -> Self {
        Self {
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_cost: 0.0,
            max_budget,
        }
    }

    /// Record usage of one successful LLM call.
    pub fn charge(&mut self, prompt_tokens: u64, completion_tokens: u64, model: &str) {
        let price = price_for(model);
        self.total_prompt_tokens += prompt_tokens;
        self.total_completion_tokens += completion_tokens;
        self.total_cost += (prompt_tokens as f64 / 1000.0) * price.prompt
            + (completion_tokens as f64 / 1000.0) * price.completion;
    }

    /// Fail once spend has reached the budget.
    pub fn enforce_budget(&self) -> EngineResult<()> {
        if self.total_cost >= self.max_budget {
            return Err(EngineError::BudgetExceeded {
                cost: self.total_cost,
                budget: self.max_budget,
            });
        }
        Ok(())
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    pub fn remaining(&self) -> f64 {
        (self.max_budget - self.total_cost).max(0.0)
    }

    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CostLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cost Summary:")?;
        writeln!(f, "  Prompt tokens: {}", self.total_prompt_tokens)?;
        writeln!(f, "  Completion tokens: {}", self.total_completion_tokens)?;
        writeln!(f, "  Total tokens: {}", self.total_tokens())?;
        writeln!(f, "  Total cost: ${:.4}", self.total_cost)?;
        writeln!(f, "  Budget: ${:.2}", self.max_budget)?;
        write!(f, "  Remaining: ${:.4}", self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_uses_model_price() {
        let mut ledger = CostLedger::new(10.0);
        ledger.charge(1000, 1000, "gpt-4");
        assert!((ledger.total_cost - 0.09).abs() < 1e-12);
        assert_eq!(ledger.total_prompt_tokens, 1000);
        assert_eq!(ledger.total_completion_tokens, 1000);
        assert_eq!(ledger.total_tokens(), 2000);
    }

    #[test]
    fn unknown_model_falls_back_to_default_tier() {
        let mut a = CostLedger::new(10.0);
        let mut b = CostLedger::new(10.0);
        a.charge(2000, 500, "some-local-model");
        b.charge(2000, 500, DEFAULT_PRICE_TIER);
        assert_eq!(a.total_cost, b.total_cost);
    }

    #[test]
    fn dated_model_names_match_by_prefix() {
        assert_eq!(price_for("gpt-4o-mini-2024-07-18"), price_for("gpt-4o-mini"));
        assert_eq!(price_for("gpt-4o-2024-08-06"), price_for("gpt-4o"));
        assert_eq!(price_for("claude-sonnet-4-20250514"), price_for("claude-sonnet-4"));
    }

    #[test]
    fn charging_is_linear() {
        let mut twice = CostLedger::new(10.0);
        twice.charge(1234, 567, "gpt-4o");
        twice.charge(1234, 567, "gpt-4o");

        let mut once = CostLedger::new(10.0);
        once.charge(2468, 1134, "gpt-4o");

        assert!((twice.total_cost - once.total_cost).abs() < 1e-12);
        assert_eq!(twice.total_tokens(), once.total_tokens());
    }

    #[test]
    fn enforce_budget_fails_at_or_above_budget() {
        let mut ledger = CostLedger::new(0.05);
        assert!(ledger.enforce_budget().is_ok());

        ledger.charge(1000, 1000, "gpt-4");
        let err = ledger.enforce_budget().unwrap_err();
        assert!(err.is_budget_exceeded());

        let mut under = CostLedger::new(1.0);
        under.charge(1000, 1000, "gpt-4");
        assert!(under.enforce_budget().is_ok());
    }

    #[test]
    fn zero_budget_is_exceeded_immediately() {
        let ledger = CostLedger::new(0.0);
        match ledger.enforce_budget() {
            Err(EngineError::BudgetExceeded { cost, budget }) => {
                assert_eq!(cost, 0.0);
                assert_eq!(budget, 0.0);
            }
            other => panic!("Expected BudgetExceeded, got {:?}", other),
        }
    }

    #[test]
    fn summary_reports_remaining() {
        let mut ledger = CostLedger::new(1.0);
        ledger.charge(1000, 0, "gpt-4");
        let summary = ledger.summary();
        assert!(summary.contains("Prompt tokens: 1000"));
        assert!(summary.contains("Remaining: $0.9700"));
    }
}
