//! In-memory fakes for the exchange, price, notifier and ledger seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::api::{ExchangeGateway, GatewayError, OrderReceipt, PriceSource};
use crate::ledger::{LedgerError, LedgerStore};
use crate::models::{RawSentimentRecord, TradeAction, TradeRecord};
use crate::notify::Notifier;
use crate::sentiment::SentimentSource;

/// Fixed spot prices; unknown symbols have no price.
#[derive(Default)]
pub struct FakePrices {
    prices: Mutex<HashMap<String, Decimal>>,
    lookups: Mutex<HashMap<String, usize>>,
}

impl FakePrices {
    pub fn new(prices: &[(&str, Decimal)]) -> Self {
        Self {
            prices: Mutex::new(prices.iter().map(|(s, p)| (s.to_string(), *p)).collect()),
            lookups: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `symbol` was quoted.
    pub fn lookups(&self, symbol: &str) -> usize {
        self.lookups.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PriceSource for FakePrices {
    async fn spot_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        *self.lookups.lock().unwrap().entry(symbol.to_string()).or_default() += 1;
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::Unavailable(symbol.to_string()))
    }
}

/// Order sent to [`FakeExchange`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub action: TradeAction,
    pub symbol: String,
    /// USD for buys, units for sells
    pub amount: Decimal,
    pub at: tokio::time::Instant,
}

/// Exchange that accepts every order unless told otherwise.
#[derive(Default)]
pub struct FakeExchange {
    balances: Mutex<HashMap<String, Decimal>>,
    failing_buys: Mutex<HashSet<String>>,
    failing_sells: Mutex<HashSet<String>>,
    failing_balances: Mutex<HashSet<String>>,
    orders: Mutex<Vec<PlacedOrder>>,
}

impl FakeExchange {
    pub fn with_balance(self, symbol: &str, balance: Decimal) -> Self {
        self.balances.lock().unwrap().insert(symbol.to_string(), balance);
        self
    }

    pub fn failing_buy(self, symbol: &str) -> Self {
        self.failing_buys.lock().unwrap().insert(symbol.to_string());
        self
    }

    pub fn failing_sell(self, symbol: &str) -> Self {
        self.failing_sells.lock().unwrap().insert(symbol.to_string());
        self
    }

    pub fn failing_balance(self, symbol: &str) -> Self {
        self.failing_balances.lock().unwrap().insert(symbol.to_string());
        self
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.orders.lock().unwrap().clone()
    }

    fn place(&self, action: TradeAction, symbol: &str, amount: Decimal) -> OrderReceipt {
        let mut orders = self.orders.lock().unwrap();
        orders.push(PlacedOrder {
            action,
            symbol: symbol.to_string(),
            amount,
            at: tokio::time::Instant::now(),
        });
        OrderReceipt {
            order_id: format!("fake-{}", orders.len()),
            status: "completed".to_string(),
        }
    }
}

#[async_trait]
impl ExchangeGateway for FakeExchange {
    async fn buy(&self, symbol: &str, amount_usd: Decimal) -> Result<OrderReceipt, GatewayError> {
        if self.failing_buys.lock().unwrap().contains(symbol) {
            return Err(GatewayError::Rejected(format!("buy {} refused", symbol)));
        }
        Ok(self.place(TradeAction::Buy, symbol, amount_usd))
    }

    async fn sell(&self, symbol: &str, crypto_amount: Decimal) -> Result<OrderReceipt, GatewayError> {
        if self.failing_sells.lock().unwrap().contains(symbol) {
            return Err(GatewayError::Rejected(format!("sell {} refused", symbol)));
        }
        Ok(self.place(TradeAction::Sell, symbol, crypto_amount))
    }

    async fn balance(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        if self.failing_balances.lock().unwrap().contains(symbol) {
            return Err(GatewayError::Unavailable(symbol.to_string()));
        }
        Ok(self.balances.lock().unwrap().get(symbol).copied().unwrap_or_default())
    }
}

/// Keeps every notification for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    pub trades: Mutex<Vec<(String, TradeAction, Decimal, Decimal)>>,
    pub errors: Mutex<Vec<String>>,
    pub summaries: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn trade_count(&self) -> usize {
        self.trades.lock().unwrap().len()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<String> {
        self.summaries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_trade(&self, symbol: &str, action: TradeAction, amount_usd: Decimal, price: Decimal) {
        self.trades
            .lock()
            .unwrap()
            .push((symbol.to_string(), action, amount_usd, price));
    }

    async fn notify_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    async fn notify_summary(&self, text: &str) {
        self.summaries.lock().unwrap().push(text.to_string());
    }
}

/// Ledger store backed by a shared vector. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    records: Arc<Mutex<Vec<TradeRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryLedgerStore {
    pub fn with_records(records: Vec<TradeRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            failing: Arc::default(),
        }
    }

    /// Make every append fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load_all(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("disk full".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Sentiment source returning a fixed table.
#[derive(Default)]
pub struct StaticSentiment {
    pub rows: Vec<RawSentimentRecord>,
}

#[async_trait]
impl SentimentSource for StaticSentiment {
    async fn fetch(&self) -> anyhow::Result<Vec<RawSentimentRecord>> {
        Ok(self.rows.clone())
    }

    fn describe(&self) -> String {
        "static table".to_string()
    }
}

/// Raw row with every score set to `score`.
pub fn raw_row(symbol: &str, score: f64) -> RawSentimentRecord {
    RawSentimentRecord {
        entity: symbol.to_string(),
        symbol: symbol.to_string(),
        sentiment: Some(score),
        objectivity: Some(score),
        agreement: Some(score),
        confidence: Some(score),
        credibility: Some(score),
        timestamp: None,
    }
}
