//! Margin policies: how much USD is withheld from the wallet when an order
//! opens. Pluggable so the engine is not locked to one rule.

use crate::config::{MarginConfig, MarginMode};

pub trait MarginPolicy: Send + Sync {
    fn required_margin(&self, symbol: &str, lots: f64, entry_price: f64) -> f64;
}

/// Fixed USD amount per trade, regardless of symbol or size. The default.
pub struct FlatMargin {
    pub amount: f64,
}

impl MarginPolicy for FlatMargin {
    fn required_margin(&self, _symbol: &str, _lots: f64, _entry_price: f64) -> f64 {
        self.amount
    }
}

/// Notional divided by leverage: `lots * entry_price / leverage`.
pub struct LeverageMargin {
    pub leverage: f64,
}

impl MarginPolicy for LeverageMargin {
    fn required_margin(&self, _symbol: &str, lots: f64, entry_price: f64) -> f64 {
        lots * entry_price / self.leverage
    }
}

/// Build the configured policy.
pub fn policy_from_config(config: &MarginConfig) -> Box<dyn MarginPolicy> {
    match config.mode {
        MarginMode::Flat => Box::new(FlatMargin {
            amount: config.flat_amount,
        }),
        MarginMode::Leverage => Box::new(LeverageMargin {
            leverage: config.leverage,
        }),
    }
}
