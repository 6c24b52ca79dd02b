//! Per-symbol contract size for quantity and pnl calculation:
//! `qty = lots * contract_size(symbol)`.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Major-currency bases that mark an `...USDT` pair as FX-style.
static FX_BASES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["EUR", "GBP", "AUD", "NZD", "USD", "JPY"]
        .into_iter()
        .collect()
});

/// Symbol-keyed contract-size policy. FX-style pairs trade in standard lots
/// of `fx_contract_size` units; everything else is 1:1.
#[derive(Debug, Clone)]
pub struct SymbolSpecs {
    fx_contract_size: f64,
}

impl SymbolSpecs {
    pub fn new(fx_contract_size: f64) -> Self {
        Self { fx_contract_size }
    }

    pub fn contract_size(&self, symbol: &str) -> f64 {
        let s = symbol.to_uppercase();
        let fx_base = s.get(..3).map_or(false, |base| FX_BASES.contains(base));
        if s.ends_with("USDT") && fx_base {
            self.fx_contract_size
        } else {
            1.0
        }
    }
}

impl Default for SymbolSpecs {
    fn default() -> Self {
        Self::new(100_000.0)
    }
}
