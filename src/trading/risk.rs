//! Stop-loss / take-profit monitoring over the trade ledger.

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::api::PriceSource;
use crate::models::TradeRecord;

use super::TradingConfig;

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

/// Sell order the monitor wants placed before the cycle's own signals.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcedSell {
    pub symbol: String,
    /// Current USD value of the position
    pub amount_usd: Decimal,
    pub reason: ExitReason,
    pub purchase_price: Decimal,
    pub current_price: Decimal,
    pub change_pct: Decimal,
}

/// Evaluates open buys against the stop-loss and take-profit thresholds.
#[derive(Debug, Clone)]
pub struct RiskMonitor {
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
}

impl RiskMonitor {
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
        }
    }

    /// Check a single buy against a current price.
    ///
    /// Boundaries are inclusive: exactly -stop_loss or +take_profit triggers.
    pub fn check(&self, buy: &TradeRecord, current_price: Decimal) -> Option<ForcedSell> {
        let change_pct = buy.change_pct(current_price)?;

        let reason = if change_pct <= -self.stop_loss_pct {
            ExitReason::StopLoss
        } else if change_pct >= self.take_profit_pct {
            ExitReason::TakeProfit
        } else {
            return None;
        };

        Some(ForcedSell {
            symbol: buy.symbol.clone(),
            amount_usd: buy.amount_usd * (current_price / buy.price),
            reason,
            purchase_price: buy.price,
            current_price,
            change_pct,
        })
    }

    /// Forced sells for every open buy whose price crossed a threshold.
    ///
    /// A symbol with no available price is skipped for this evaluation.
    pub async fn evaluate(&self, records: &[TradeRecord], prices: &dyn PriceSource) -> Vec<ForcedSell> {
        let open = open_buys(records);
        debug!(open_buys = open.len(), "Evaluating open positions");

        let mut quotes: HashMap<String, Option<Decimal>> = HashMap::new();
        let mut forced = Vec::new();

        for buy in open {
            if buy.price <= Decimal::ZERO {
                warn!(symbol = %buy.symbol, price = %buy.price, "Open buy has no usable purchase price");
                continue;
            }

            let quote = match quotes.get(&buy.symbol).copied() {
                Some(q) => q,
                None => {
                    let q = match prices.spot_price(&buy.symbol).await {
                        Ok(p) if p > Decimal::ZERO => Some(p),
                        Ok(p) => {
                            warn!(symbol = %buy.symbol, price = %p, "Ignoring non-positive spot price");
                            None
                        }
                        Err(e) => {
                            warn!(symbol = %buy.symbol, error = %e, "No price for open position, skipping");
                            None
                        }
                    };
                    quotes.insert(buy.symbol.clone(), q);
                    q
                }
            };

            let Some(current_price) = quote else {
                continue;
            };

            if let Some(sell) = self.check(buy, current_price) {
                info!(
                    symbol = %sell.symbol,
                    reason = ?sell.reason,
                    change_pct = %sell.change_pct.round_dp(2),
                    amount_usd = %sell.amount_usd.round_dp(2),
                    "Risk threshold crossed"
                );
                forced.push(sell);
            }
        }

        forced
    }
}

/// Completed buys that later completed sells have not fully covered.
///
/// Sells use up the oldest open buys of their symbol first, each unit sold
/// counted once. A buy stays open while any of its quantity is left, and
/// every open buy is still checked on its own.
pub fn open_buys(records: &[TradeRecord]) -> Vec<&TradeRecord> {
    let mut remaining = vec![Decimal::ZERO; records.len()];
    let mut queues: HashMap<&str, VecDeque<usize>> = HashMap::new();

    for (i, record) in records.iter().enumerate() {
        if record.is_completed_buy() {
            remaining[i] = record.filled_quantity();
            queues.entry(record.symbol.as_str()).or_default().push_back(i);
        } else if record.is_completed_sell() {
            // A sell with nothing bought before it covers nothing.
            let Some(queue) = queues.get_mut(record.symbol.as_str()) else {
                continue;
            };
            let mut to_cover = record.filled_quantity();
            while to_cover > QUANTITY_TOLERANCE {
                let Some(&oldest) = queue.front() else {
                    break;
                };
                let used = to_cover.min(remaining[oldest]);
                remaining[oldest] -= used;
                to_cover -= used;
                if remaining[oldest] <= QUANTITY_TOLERANCE {
                    queue.pop_front();
                }
            }
        }
    }

    records
        .iter()
        .enumerate()
        .filter(|(i, r)| r.is_completed_buy() && remaining[*i] > QUANTITY_TOLERANCE)
        .map(|(_, r)| r)
        .collect()
}

/// Rounding slack when comparing quantities derived from USD / price.
const QUANTITY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 12);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeAction;
    use crate::testing::FakePrices;
    use rust_decimal_macros::dec;

    fn monitor() -> RiskMonitor {
        RiskMonitor::new(&TradingConfig {
            stop_loss_pct: dec!(5),
            take_profit_pct: dec!(10),
            ..Default::default()
        })
    }

    fn buy(symbol: &str, amount: Decimal, price: Decimal) -> TradeRecord {
        TradeRecord::completed(symbol, TradeAction::Buy, amount, amount / price, price)
    }

    fn sell(symbol: &str, amount: Decimal, price: Decimal) -> TradeRecord {
        TradeRecord::completed(symbol, TradeAction::Sell, amount, amount / price, price)
    }

    #[test]
    fn test_stop_loss_sells_current_value() {
        let forced = monitor().check(&buy("ETH", dec!(100), dec!(100)), dec!(94)).unwrap();

        assert_eq!(forced.reason, ExitReason::StopLoss);
        assert_eq!(forced.amount_usd, dec!(94));
        assert_eq!(forced.change_pct, dec!(-6));
    }

    #[test]
    fn test_boundaries_trigger() {
        let position = buy("ETH", dec!(100), dec!(100));

        let at_stop = monitor().check(&position, dec!(95)).unwrap();
        assert_eq!(at_stop.reason, ExitReason::StopLoss);

        let at_target = monitor().check(&position, dec!(110)).unwrap();
        assert_eq!(at_target.reason, ExitReason::TakeProfit);
        assert_eq!(at_target.amount_usd, dec!(110));
    }

    #[test]
    fn test_no_sell_strictly_inside_band() {
        let position = buy("ETH", dec!(100), dec!(200));
        for price in [dec!(190.01), dec!(195), dec!(200), dec!(210), dec!(219.99)] {
            assert!(monitor().check(&position, price).is_none(), "price {}", price);
        }
    }

    #[test]
    fn test_open_buys_excludes_failed_and_covered() {
        let records = vec![
            buy("BTC", dec!(100), dec!(50000)),
            TradeRecord::failed("ETH", TradeAction::Buy, dec!(100), dec!(2000)),
            buy("SOL", dec!(100), dec!(100)),
            // Forced sell of the full SOL position at a lower price covers it.
            sell("SOL", dec!(94), dec!(94)),
        ];

        let open = open_buys(&records);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "BTC");
    }

    #[test]
    fn test_partial_sell_does_not_close_buy() {
        let records = vec![
            buy("SOL", dec!(100), dec!(100)),
            sell("SOL", dec!(50), dec!(100)),
        ];
        assert_eq!(open_buys(&records).len(), 1);
    }

    #[test]
    fn test_sell_before_buy_does_not_cover_it() {
        let records = vec![
            sell("SOL", dec!(100), dec!(100)),
            buy("SOL", dec!(100), dec!(100)),
        ];
        assert_eq!(open_buys(&records).len(), 1);
    }

    #[test]
    fn test_one_sell_closes_only_the_oldest_layered_buy() {
        let records = vec![
            buy("ETH", dec!(100), dec!(100)),
            buy("ETH", dec!(200), dec!(200)),
            sell("ETH", dec!(100), dec!(100)),
        ];

        let open = open_buys(&records);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].price, dec!(200));
    }

    #[test]
    fn test_sell_spanning_two_buys_closes_both() {
        let records = vec![
            buy("ETH", dec!(100), dec!(100)),
            buy("ETH", dec!(100), dec!(100)),
            buy("ETH", dec!(100), dec!(100)),
            sell("ETH", dec!(200), dec!(100)),
        ];

        let open = open_buys(&records);
        assert_eq!(open.len(), 1);
        assert!(std::ptr::eq(open[0], &records[2]));
    }

    #[tokio::test]
    async fn test_stop_loss_fires_on_remaining_layered_buy() {
        let records = vec![
            buy("ETH", dec!(100), dec!(100)),
            buy("ETH", dec!(100), dec!(100)),
            sell("ETH", dec!(100), dec!(100)),
        ];
        let prices = FakePrices::new(&[("ETH", dec!(80))]);

        let forced = monitor().evaluate(&records, &prices).await;

        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].reason, ExitReason::StopLoss);
        assert_eq!(forced[0].amount_usd, dec!(80));
    }

    #[tokio::test]
    async fn test_evaluate_skips_symbols_without_price() {
        let records = vec![
            buy("ETH", dec!(100), dec!(100)),
            buy("XYZ", dec!(100), dec!(100)),
        ];
        let prices = FakePrices::new(&[("ETH", dec!(94))]);

        let forced = monitor().evaluate(&records, &prices).await;

        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].symbol, "ETH");
        assert_eq!(forced[0].amount_usd, dec!(94));
    }

    #[tokio::test]
    async fn test_evaluate_checks_layered_buys_independently() {
        let records = vec![
            buy("ETH", dec!(100), dec!(100)),
            buy("ETH", dec!(100), dec!(80)),
        ];
        let prices = FakePrices::new(&[("ETH", dec!(90))]);

        let forced = monitor().evaluate(&records, &prices).await;

        // -10% on the first buy, +12.5% on the second: both exit.
        assert_eq!(forced.len(), 2);
        assert_eq!(forced[0].reason, ExitReason::StopLoss);
        assert_eq!(forced[1].reason, ExitReason::TakeProfit);
        assert_eq!(prices.lookups("ETH"), 1);
    }
}
