//! Order execution for one cycle.
//!
//! Order of work is fixed: forced sells from the risk monitor, then the
//! ranker's buys, then its sells. Every per-symbol failure is contained here;
//! only a ledger write failure stops the batch.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::api::{ExchangeGateway, PriceSource};
use crate::ledger::TradeLedger;
use crate::models::{TradeAction, TradeRecord};
use crate::notify::Notifier;

use super::risk::{ExitReason, ForcedSell, RiskMonitor};
use super::{CycleError, TradingConfig};

/// Why no order was sent for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Spot price missing or not positive
    NoPrice,
    /// Zero balance or balance query failed
    NoBalance,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPrice => write!(f, "no price"),
            SkipReason::NoBalance => write!(f, "no balance"),
        }
    }
}

/// What happened to one order attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled {
        order_id: String,
        crypto_amount: Decimal,
        price: Decimal,
    },
    Rejected(String),
    Skipped(SkipReason),
}

/// Where an order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOrigin {
    StopLoss,
    TakeProfit,
    Signal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub symbol: String,
    pub action: TradeAction,
    pub origin: OrderOrigin,
    pub amount_usd: Decimal,
    pub outcome: OrderOutcome,
}

/// Every order attempt of one execution, in the order they happened.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub orders: Vec<OrderReport>,
    /// Ledger records appended by this execution
    pub records_appended: usize,
}

impl ExecutionReport {
    pub fn filled(&self) -> usize {
        self.count(|o| matches!(o, OrderOutcome::Filled { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, OrderOutcome::Rejected(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, OrderOutcome::Skipped(_)))
    }

    pub fn forced(&self) -> usize {
        self.orders
            .iter()
            .filter(|o| o.origin != OrderOrigin::Signal)
            .count()
    }

    fn count(&self, pred: impl Fn(&OrderOutcome) -> bool) -> usize {
        self.orders.iter().filter(|o| pred(&o.outcome)).count()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} filled, {} rejected, {} skipped ({} forced)",
            self.filled(),
            self.rejected(),
            self.skipped(),
            self.forced()
        )
    }
}

/// Places orders through the exchange and records them in the ledger.
pub struct OrderExecutor {
    config: TradingConfig,
    exchange: Arc<dyn ExchangeGateway>,
    prices: Arc<dyn PriceSource>,
    notifier: Arc<dyn Notifier>,
    risk: RiskMonitor,
    last_order: Option<Instant>,
}

impl OrderExecutor {
    pub fn new(
        config: TradingConfig,
        exchange: Arc<dyn ExchangeGateway>,
        prices: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let risk = RiskMonitor::new(&config);
        Self {
            config,
            exchange,
            prices,
            notifier,
            risk,
            last_order: None,
        }
    }

    /// Run forced sells, then buys, then sells.
    ///
    /// Signals are not de-duplicated against earlier cycles: the same input
    /// twice places the same orders twice.
    pub async fn execute(
        &mut self,
        buy_symbols: &[String],
        sell_symbols: &[String],
        ledger: &mut TradeLedger,
    ) -> Result<ExecutionReport, CycleError> {
        self.last_order = None;
        let mut report = ExecutionReport::default();

        let forced = self.risk.evaluate(ledger.all(), self.prices.as_ref()).await;
        if !forced.is_empty() {
            info!(count = forced.len(), "Executing risk exits");
        }
        for exit in &forced {
            let attempt = self.forced_sell(exit, ledger).await?;
            report.push(attempt);
        }

        for symbol in buy_symbols {
            let attempt = self.buy(symbol, ledger).await?;
            report.push(attempt);
        }

        for symbol in sell_symbols {
            let attempt = self.signal_sell(symbol, ledger).await?;
            report.push(attempt);
        }

        info!(
            filled = report.filled(),
            rejected = report.rejected(),
            skipped = report.skipped(),
            appended = report.records_appended,
            "Execution finished"
        );
        Ok(report)
    }

    async fn buy(&mut self, symbol: &str, ledger: &mut TradeLedger) -> Result<Attempt, CycleError> {
        let amount_usd = self.config.amount_usd;
        let Some(price) = self.quote(symbol).await else {
            return Ok(Attempt::skipped(symbol, TradeAction::Buy, OrderOrigin::Signal, amount_usd, SkipReason::NoPrice));
        };
        let crypto_amount = amount_usd / price;

        self.notifier
            .notify_trade(symbol, TradeAction::Buy, amount_usd, price)
            .await;
        self.pace().await;
        let placed = self.exchange.buy(symbol, amount_usd).await;
        self.last_order = Some(Instant::now());

        let (outcome, record) = match placed {
            Ok(receipt) => {
                info!(
                    symbol = %symbol,
                    amount_usd = %amount_usd,
                    crypto_amount = %crypto_amount.round_dp(8),
                    price = %price,
                    order_id = %receipt.order_id,
                    "Buy completed"
                );
                (
                    OrderOutcome::Filled {
                        order_id: receipt.order_id,
                        crypto_amount,
                        price,
                    },
                    TradeRecord::completed(symbol, TradeAction::Buy, amount_usd, crypto_amount, price),
                )
            }
            Err(e) => {
                warn!(symbol = %symbol, amount_usd = %amount_usd, error = %e, "Buy failed");
                (
                    OrderOutcome::Rejected(e.to_string()),
                    TradeRecord::failed(symbol, TradeAction::Buy, amount_usd, price),
                )
            }
        };

        self.record(ledger, record).await?;
        Ok(Attempt::recorded(symbol, TradeAction::Buy, OrderOrigin::Signal, amount_usd, outcome))
    }

    async fn signal_sell(&mut self, symbol: &str, ledger: &mut TradeLedger) -> Result<Attempt, CycleError> {
        let amount_usd = self.config.amount_usd;

        match self.exchange.balance(symbol).await {
            Ok(balance) if balance > Decimal::ZERO => {
                debug!(symbol = %symbol, balance = %balance, "Holding found, selling");
            }
            Ok(_) => {
                debug!(symbol = %symbol, "Nothing held, skipping sell");
                return Ok(Attempt::skipped(symbol, TradeAction::Sell, OrderOrigin::Signal, amount_usd, SkipReason::NoBalance));
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Balance unavailable, skipping sell");
                return Ok(Attempt::skipped(symbol, TradeAction::Sell, OrderOrigin::Signal, amount_usd, SkipReason::NoBalance));
            }
        }

        let Some(price) = self.quote(symbol).await else {
            return Ok(Attempt::skipped(symbol, TradeAction::Sell, OrderOrigin::Signal, amount_usd, SkipReason::NoPrice));
        };

        self.sell(symbol, amount_usd, price, OrderOrigin::Signal, ledger).await
    }

    /// Forced exits reuse the price the risk check saw and skip the balance check.
    async fn forced_sell(&mut self, exit: &ForcedSell, ledger: &mut TradeLedger) -> Result<Attempt, CycleError> {
        let origin = match exit.reason {
            ExitReason::StopLoss => OrderOrigin::StopLoss,
            ExitReason::TakeProfit => OrderOrigin::TakeProfit,
        };
        self.sell(&exit.symbol, exit.amount_usd, exit.current_price, origin, ledger)
            .await
    }

    async fn sell(
        &mut self,
        symbol: &str,
        amount_usd: Decimal,
        price: Decimal,
        origin: OrderOrigin,
        ledger: &mut TradeLedger,
    ) -> Result<Attempt, CycleError> {
        let crypto_amount = amount_usd / price;

        self.notifier
            .notify_trade(symbol, TradeAction::Sell, amount_usd, price)
            .await;
        self.pace().await;
        let placed = self.exchange.sell(symbol, crypto_amount).await;
        self.last_order = Some(Instant::now());

        match placed {
            Ok(receipt) => {
                info!(
                    symbol = %symbol,
                    origin = ?origin,
                    amount_usd = %amount_usd.round_dp(2),
                    crypto_amount = %crypto_amount.round_dp(8),
                    price = %price,
                    order_id = %receipt.order_id,
                    "Sell completed"
                );
                let record = TradeRecord::completed(symbol, TradeAction::Sell, amount_usd, crypto_amount, price);
                self.record(ledger, record).await?;
                Ok(Attempt::recorded(
                    symbol,
                    TradeAction::Sell,
                    origin,
                    amount_usd,
                    OrderOutcome::Filled {
                        order_id: receipt.order_id,
                        crypto_amount,
                        price,
                    },
                ))
            }
            Err(e) => {
                // No funds moved, so nothing goes to the ledger.
                warn!(symbol = %symbol, origin = ?origin, error = %e, "Sell failed");
                Ok(Attempt::unrecorded(
                    symbol,
                    TradeAction::Sell,
                    origin,
                    amount_usd,
                    OrderOutcome::Rejected(e.to_string()),
                ))
            }
        }
    }

    /// Positive spot price or `None`.
    async fn quote(&self, symbol: &str) -> Option<Decimal> {
        match self.prices.spot_price(symbol).await {
            Ok(price) if price > Decimal::ZERO => Some(price),
            Ok(price) => {
                warn!(symbol = %symbol, price = %price, "Non-positive spot price, skipping");
                None
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "No spot price, skipping");
                None
            }
        }
    }

    /// Wait until `order_delay` has passed since the previous order returned.
    async fn pace(&self) {
        if let Some(last) = self.last_order {
            sleep_until(last + self.config.order_delay()).await;
        }
    }

    async fn record(&self, ledger: &mut TradeLedger, record: TradeRecord) -> Result<(), CycleError> {
        let symbol = record.symbol.clone();
        if let Err(e) = ledger.append(record).await {
            let message = format!(
                "Trade for {} could not be written to the ledger ({}); halting further orders",
                symbol, e
            );
            error!(symbol = %symbol, error = %e, "Ledger write failed");
            self.notifier.notify_error(&message).await;
            return Err(CycleError::Persistence(e));
        }
        Ok(())
    }
}

/// Order attempt plus whether it reached the ledger.
struct Attempt {
    report: OrderReport,
    recorded: bool,
}

impl Attempt {
    fn recorded(symbol: &str, action: TradeAction, origin: OrderOrigin, amount_usd: Decimal, outcome: OrderOutcome) -> Self {
        Self::new(symbol, action, origin, amount_usd, outcome, true)
    }

    fn unrecorded(symbol: &str, action: TradeAction, origin: OrderOrigin, amount_usd: Decimal, outcome: OrderOutcome) -> Self {
        Self::new(symbol, action, origin, amount_usd, outcome, false)
    }

    fn skipped(symbol: &str, action: TradeAction, origin: OrderOrigin, amount_usd: Decimal, reason: SkipReason) -> Self {
        Self::new(symbol, action, origin, amount_usd, OrderOutcome::Skipped(reason), false)
    }

    fn new(
        symbol: &str,
        action: TradeAction,
        origin: OrderOrigin,
        amount_usd: Decimal,
        outcome: OrderOutcome,
        recorded: bool,
    ) -> Self {
        Self {
            report: OrderReport {
                symbol: symbol.to_string(),
                action,
                origin,
                amount_usd,
                outcome,
            },
            recorded,
        }
    }
}

impl ExecutionReport {
    fn push(&mut self, attempt: Attempt) {
        if attempt.recorded {
            self.records_appended += 1;
        }
        self.orders.push(attempt.report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeStatus;
    use crate::testing::{FakeExchange, FakePrices, MemoryLedgerStore, RecordingNotifier};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio_test::assert_err;

    struct Harness {
        executor: OrderExecutor,
        exchange: Arc<FakeExchange>,
        notifier: Arc<RecordingNotifier>,
        store: MemoryLedgerStore,
        ledger: TradeLedger,
    }

    async fn harness(exchange: FakeExchange, prices: FakePrices, history: Vec<TradeRecord>) -> Harness {
        let config = TradingConfig {
            order_delay_ms: 0,
            ..Default::default()
        };
        let exchange = Arc::new(exchange);
        let notifier = Arc::new(RecordingNotifier::default());
        let store = MemoryLedgerStore::with_records(history);
        let ledger = TradeLedger::load(Box::new(store.clone())).await.unwrap();

        Harness {
            executor: OrderExecutor::new(config, exchange.clone(), Arc::new(prices), notifier.clone()),
            exchange,
            notifier,
            store,
            ledger,
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_buy_records_completed_trade() {
        let mut h = harness(FakeExchange::default(), FakePrices::new(&[("BTC", dec!(50000))]), vec![]).await;

        let report = h.executor.execute(&symbols(&["BTC"]), &[], &mut h.ledger).await.unwrap();

        assert_eq!(report.filled(), 1);
        let record = &h.ledger.all()[0];
        assert_eq!(record.status, TradeStatus::Completed);
        assert_eq!(record.amount_usd, dec!(100));
        assert_eq!(record.crypto_amount, Some(dec!(0.002)));
        assert_eq!(record.price, dec!(50000));
        assert_eq!(h.notifier.trade_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_price_skips_without_record() {
        let prices = FakePrices::new(&[("BTC", dec!(50000)), ("ZERO", Decimal::ZERO)]);
        let mut h = harness(FakeExchange::default(), prices, vec![]).await;

        let report = h
            .executor
            .execute(&symbols(&["XYZ", "ZERO", "BTC"]), &[], &mut h.ledger)
            .await
            .unwrap();

        assert_eq!(report.skipped(), 2);
        assert_eq!(report.orders[0].outcome, OrderOutcome::Skipped(SkipReason::NoPrice));
        assert_eq!(h.ledger.len(), 1);
        assert_eq!(h.ledger.all()[0].symbol, "BTC");
        assert_eq!(h.exchange.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_buy_is_recorded_without_quantity() {
        let exchange = FakeExchange::default().failing_buy("ETH");
        let prices = FakePrices::new(&[("ETH", dec!(2000)), ("SOL", dec!(100))]);
        let mut h = harness(exchange, prices, vec![]).await;

        let report = h
            .executor
            .execute(&symbols(&["ETH", "SOL"]), &[], &mut h.ledger)
            .await
            .unwrap();

        assert_eq!(report.rejected(), 1);
        assert_eq!(report.filled(), 1);

        let failed = &h.ledger.all()[0];
        assert_eq!(failed.symbol, "ETH");
        assert_eq!(failed.status, TradeStatus::Failed);
        assert_eq!(failed.amount_usd, dec!(100));
        assert_eq!(failed.crypto_amount, None);
        assert_eq!(h.ledger.all()[1].status, TradeStatus::Completed);
    }

    #[tokio::test]
    async fn test_sell_skipped_without_balance() {
        let exchange = FakeExchange::default()
            .with_balance("DOGE", Decimal::ZERO)
            .failing_balance("ADA")
            .with_balance("SOL", dec!(3));
        let prices = FakePrices::new(&[("DOGE", dec!(0.1)), ("ADA", dec!(0.5)), ("SOL", dec!(100))]);
        let mut h = harness(exchange, prices, vec![]).await;

        let report = h
            .executor
            .execute(&[], &symbols(&["DOGE", "ADA", "SOL"]), &mut h.ledger)
            .await
            .unwrap();

        assert_eq!(report.orders[0].outcome, OrderOutcome::Skipped(SkipReason::NoBalance));
        assert_eq!(report.orders[1].outcome, OrderOutcome::Skipped(SkipReason::NoBalance));
        assert_eq!(h.ledger.len(), 1);

        let sold = &h.ledger.all()[0];
        assert_eq!(sold.symbol, "SOL");
        assert_eq!(sold.action, TradeAction::Sell);
        assert_eq!(sold.crypto_amount, Some(dec!(1)));
    }

    #[tokio::test]
    async fn test_failed_sell_is_not_recorded() {
        let exchange = FakeExchange::default()
            .with_balance("SOL", dec!(3))
            .failing_sell("SOL");
        let mut h = harness(exchange, FakePrices::new(&[("SOL", dec!(100))]), vec![]).await;

        let report = h.executor.execute(&[], &symbols(&["SOL"]), &mut h.ledger).await.unwrap();

        assert_eq!(report.rejected(), 1);
        assert_eq!(report.records_appended, 0);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_forced_sells_run_first() {
        let history = vec![TradeRecord::completed("ETH", TradeAction::Buy, dec!(100), dec!(1), dec!(100))];
        let prices = FakePrices::new(&[("ETH", dec!(94)), ("BTC", dec!(50000))]);
        let mut h = harness(FakeExchange::default(), prices, history).await;

        let report = h.executor.execute(&symbols(&["BTC"]), &[], &mut h.ledger).await.unwrap();

        assert_eq!(report.forced(), 1);
        assert_eq!(report.orders[0].origin, OrderOrigin::StopLoss);

        let orders = h.exchange.orders();
        assert_eq!(orders[0].action, TradeAction::Sell);
        assert_eq!(orders[0].symbol, "ETH");
        // Whole position: $94 at $94.
        assert_eq!(orders[0].amount, dec!(1));
        assert_eq!(orders[1].symbol, "BTC");

        let exit = &h.ledger.all()[1];
        assert_eq!(exit.action, TradeAction::Sell);
        assert_eq!(exit.amount_usd, dec!(94));

        // The exit covers the position, so a second pass does not sell again.
        let again = h.executor.execute(&[], &[], &mut h.ledger).await.unwrap();
        assert_eq!(again.forced(), 0);
    }

    #[tokio::test]
    async fn test_rejected_forced_sell_leaves_position_open() {
        let history = vec![TradeRecord::completed("ETH", TradeAction::Buy, dec!(100), dec!(1), dec!(100))];
        let exchange = FakeExchange::default().failing_sell("ETH");
        let prices = FakePrices::new(&[("ETH", dec!(90)), ("BTC", dec!(50000))]);
        let mut h = harness(exchange, prices, history).await;

        let report = h.executor.execute(&symbols(&["BTC"]), &[], &mut h.ledger).await.unwrap();

        assert_eq!(report.orders[0].origin, OrderOrigin::StopLoss);
        assert!(matches!(report.orders[0].outcome, OrderOutcome::Rejected(_)));
        assert_eq!(report.filled(), 1);

        // Only the BTC buy reached the exchange and the ledger.
        let orders = h.exchange.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "BTC");
        assert_eq!(report.records_appended, 1);
        assert_eq!(h.ledger.len(), 2);
        assert_eq!(h.ledger.all()[1].symbol, "BTC");
        assert_eq!(h.ledger.all()[1].action, TradeAction::Buy);

        // The ETH buy is still open and is retried next time.
        let again = h.executor.execute(&[], &[], &mut h.ledger).await.unwrap();
        assert_eq!(again.forced(), 1);
        assert_eq!(again.rejected(), 1);
    }

    #[tokio::test]
    async fn test_append_only_growth() {
        let prices = FakePrices::new(&[("BTC", dec!(50000)), ("ETH", dec!(2000))]);
        let mut h = harness(FakeExchange::default().failing_buy("ETH"), prices, vec![]).await;
        h.executor.execute(&symbols(&["BTC"]), &[], &mut h.ledger).await.unwrap();
        let before = h.ledger.all().to_vec();

        let report = h
            .executor
            .execute(&symbols(&["BTC", "ETH", "XYZ"]), &[], &mut h.ledger)
            .await
            .unwrap();

        assert_eq!(report.records_appended, 2);
        assert_eq!(h.ledger.len(), before.len() + report.records_appended);
        assert_eq!(&h.ledger.all()[..before.len()], before.as_slice());
        assert_eq!(h.store.len(), h.ledger.len());
    }

    #[tokio::test]
    async fn test_same_signals_twice_trade_twice() {
        let mut h = harness(FakeExchange::default(), FakePrices::new(&[("BTC", dec!(50000))]), vec![]).await;

        h.executor.execute(&symbols(&["BTC"]), &[], &mut h.ledger).await.unwrap();
        h.executor.execute(&symbols(&["BTC"]), &[], &mut h.ledger).await.unwrap();

        assert_eq!(h.ledger.len(), 2);
        assert_eq!(h.exchange.orders().len(), 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_halts_and_notifies() {
        let prices = FakePrices::new(&[("BTC", dec!(50000)), ("ETH", dec!(2000))]);
        let mut h = harness(FakeExchange::default(), prices, vec![]).await;
        h.store.set_failing(true);

        let err = assert_err!(h.executor.execute(&symbols(&["BTC", "ETH"]), &[], &mut h.ledger).await);

        assert!(matches!(err, CycleError::Persistence(_)));
        assert_eq!(h.exchange.orders().len(), 1);
        assert_eq!(h.notifier.errors().len(), 1);
        assert_eq!(h.ledger.unpersisted(), 1);
    }

    #[tokio::test]
    async fn test_orders_are_spaced() {
        let prices = FakePrices::new(&[("BTC", dec!(50000)), ("ETH", dec!(2000)), ("SOL", dec!(100))]);
        let exchange = Arc::new(FakeExchange::default());
        let store = MemoryLedgerStore::default();
        let mut ledger = TradeLedger::load(Box::new(store)).await.unwrap();
        let config = TradingConfig {
            order_delay_ms: 30,
            ..Default::default()
        };
        let mut executor = OrderExecutor::new(
            config,
            exchange.clone(),
            Arc::new(prices),
            Arc::new(RecordingNotifier::default()),
        );

        executor
            .execute(&symbols(&["BTC", "ETH", "SOL"]), &[], &mut ledger)
            .await
            .unwrap();

        let orders = exchange.orders();
        assert_eq!(orders.len(), 3);
        for pair in orders.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(30));
        }
    }
}
