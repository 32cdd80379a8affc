//! Trading signals derived from a ranked sentiment table. Never persisted.

use serde::Serialize;

use super::trade::TradeAction;

/// One ranked decision for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub action: TradeAction,
    pub composite_score: f64,
}

/// Output of one ranking pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalSet {
    /// Highest composite first
    pub buys: Vec<TradingSignal>,
    /// Lowest composite first
    pub sells: Vec<TradingSignal>,
}

impl SignalSet {
    pub fn buy_symbols(&self) -> Vec<String> {
        self.buys.iter().map(|s| s.symbol.clone()).collect()
    }

    pub fn sell_symbols(&self) -> Vec<String> {
        self.sells.iter().map(|s| s.symbol.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }
}
