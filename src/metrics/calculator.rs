//! Performance summary over the trade ledger: counts, volume, trade size, cash flow.

use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{TradeAction, TradeRecord};
use crate::trading::open_buys;

/// Aggregate view of the ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub failed_trades: usize,

    /// USD notional of completed trades
    pub total_volume: Decimal,
    /// Mean USD notional of completed trades
    pub avg_trade_size: f64,
    /// Standard deviation of completed trade notional
    pub trade_size_std_dev: f64,

    /// Completed sell proceeds minus completed buy cost
    pub net_cash_flow: Decimal,

    /// Completed buys not yet covered by a later sell
    pub open_positions: usize,
    /// Distinct symbols ever traded
    pub symbols_traded: usize,
}

/// Computes [`PerformanceStats`] from ledger records.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate(records: &[TradeRecord]) -> PerformanceStats {
        let mut stats = PerformanceStats::default();

        if records.is_empty() {
            return stats;
        }

        stats.total_trades = records.len();

        let completed: Vec<&TradeRecord> = records.iter().filter(|r| r.is_completed()).collect();
        stats.failed_trades = records.len() - completed.len();
        stats.buy_trades = completed.iter().filter(|r| r.action == TradeAction::Buy).count();
        stats.sell_trades = completed.iter().filter(|r| r.action == TradeAction::Sell).count();

        stats.total_volume = completed.iter().map(|r| r.amount_usd).sum();
        stats.net_cash_flow = completed
            .iter()
            .map(|r| match r.action {
                TradeAction::Buy => -r.amount_usd,
                TradeAction::Sell => r.amount_usd,
            })
            .sum();

        let sizes: Vec<f64> = completed
            .iter()
            .map(|r| r.amount_usd.to_f64().unwrap_or(0.0))
            .collect();
        if !sizes.is_empty() {
            stats.avg_trade_size = sizes.iter().mean();
        }
        if sizes.len() > 1 {
            stats.trade_size_std_dev = sizes.iter().std_dev();
        }

        stats.open_positions = open_buys(records).len();
        stats.symbols_traded = records
            .iter()
            .map(|r| r.symbol.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        stats
    }
}

impl fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance summary")?;
        writeln!(f, "-------------------")?;
        writeln!(f, "Total trades:     {}", self.total_trades)?;
        writeln!(f, "  Buys:           {}", self.buy_trades)?;
        writeln!(f, "  Sells:          {}", self.sell_trades)?;
        writeln!(f, "  Failed:         {}", self.failed_trades)?;
        writeln!(f, "Total volume:     ${:.2}", self.total_volume)?;
        writeln!(f, "Avg trade size:   ${:.2} (sd {:.2})", self.avg_trade_size, self.trade_size_std_dev)?;
        writeln!(f, "Net cash flow:    ${:.2}", self.net_cash_flow)?;
        writeln!(f, "Open positions:   {}", self.open_positions)?;
        write!(f, "Symbols traded:   {}", self.symbols_traded)
    }
}
