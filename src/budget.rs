//! Budget alert rules
//!
//! Deterministic, evaluated only for withdrawals, on the amount already
//! normalized into the account's currency.

use crate::config::BudgetThresholds;

pub const AI_SUGGESTION: &str = "Consider limiting spending for the rest of the day.";

#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetEvaluator {
    thresholds: BudgetThresholds,
}

impl BudgetEvaluator {
    pub fn new(thresholds: BudgetThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> BudgetThresholds {
        self.thresholds
    }

    /// Rule A: amount >= absolute threshold.
    /// Rule B: amount / balance >= relative fraction, only for positive balances.
    pub fn is_over_budget(&self, normalized_amount: f64, current_balance: f64) -> bool {
        if normalized_amount >= self.thresholds.absolute {
            return true;
        }

        current_balance > 0.0 && normalized_amount / current_balance >= self.thresholds.relative
    }
}
