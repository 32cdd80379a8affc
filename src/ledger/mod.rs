//! Append-only trade ledger: the only source of truth for positions.
//!
//! The in-memory [`TradeLedger`] is loaded once from a [`LedgerStore`] and
//! writes every appended record through to it. Records whose write failed stay
//! queued until [`TradeLedger::persist`] succeeds.

use std::collections::VecDeque;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{TradeAction, TradeRecord};
use crate::trading;

/// Failure reading or writing the persisted ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("corrupt ledger row {row}: {reason}")]
    Corrupt { row: i64, reason: String },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Every stored record, oldest first.
    async fn load_all(&self) -> Result<Vec<TradeRecord>, LedgerError>;

    /// Append one record at the end.
    async fn append(&self, record: &TradeRecord) -> Result<(), LedgerError>;
}

/// Ordered in-memory view of the ledger plus its write-through store.
pub struct TradeLedger {
    records: Vec<TradeRecord>,
    unpersisted: VecDeque<TradeRecord>,
    store: Box<dyn LedgerStore>,
}

impl TradeLedger {
    /// Load the full ledger. An empty store gives an empty ledger.
    pub async fn load(store: Box<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let records = store.load_all().await?;
        info!(records = records.len(), "Trade ledger loaded");

        Ok(Self {
            records,
            unpersisted: VecDeque::new(),
            store,
        })
    }

    /// Append a record and write it through.
    ///
    /// The record is part of the in-memory ledger even when the write fails;
    /// it stays queued for the next [`persist`](Self::persist).
    pub async fn append(&mut self, record: TradeRecord) -> Result<(), LedgerError> {
        debug!(
            symbol = %record.symbol,
            action = %record.action,
            status = %record.status,
            "Appending ledger record"
        );
        self.records.push(record.clone());
        self.unpersisted.push_back(record);
        self.persist().await
    }

    /// Write any queued records to the store, oldest first.
    pub async fn persist(&mut self) -> Result<(), LedgerError> {
        while let Some(record) = self.unpersisted.front() {
            if let Err(e) = self.store.append(record).await {
                error!(
                    symbol = %record.symbol,
                    action = %record.action,
                    amount_usd = %record.amount_usd,
                    price = %record.price,
                    status = %record.status,
                    pending = self.unpersisted.len(),
                    error = %e,
                    "Failed to persist ledger record"
                );
                return Err(e);
            }
            self.unpersisted.pop_front();
        }
        Ok(())
    }

    /// All records in append order.
    pub fn all(&self) -> &[TradeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records appended in memory but not yet stored.
    pub fn unpersisted(&self) -> usize {
        self.unpersisted.len()
    }

    /// Completed buys not yet covered by later sells.
    pub fn open_buys(&self) -> Vec<&TradeRecord> {
        trading::open_buys(&self.records)
    }

    /// Units of `symbol` bought minus units sold, over completed records.
    pub fn net_holdings(&self, symbol: &str) -> Decimal {
        self.records
            .iter()
            .filter(|r| r.symbol == symbol)
            .map(|r| match r.action {
                TradeAction::Buy => r.filled_quantity(),
                TradeAction::Sell => -r.filled_quantity(),
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeStatus;
    use crate::testing::MemoryLedgerStore;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};

    fn buy(symbol: &str) -> TradeRecord {
        TradeRecord::completed(symbol, TradeAction::Buy, dec!(100), dec!(2), dec!(50))
    }

    #[tokio::test]
    async fn test_load_empty_store() {
        let ledger = TradeLedger::load(Box::new(MemoryLedgerStore::default())).await.unwrap();
        assert!(ledger.is_empty());
        assert_eq!(ledger.all().len(), 0);
    }

    #[tokio::test]
    async fn test_append_writes_through_and_reloads() {
        let store = MemoryLedgerStore::default();
        let mut ledger = TradeLedger::load(Box::new(store.clone())).await.unwrap();

        assert_ok!(ledger.append(buy("BTC")).await);
        assert_ok!(ledger.append(TradeRecord::failed("ETH", TradeAction::Buy, dec!(100), dec!(2000))).await);

        let reloaded = TradeLedger::load(Box::new(store)).await.unwrap();
        assert_eq!(reloaded.all(), ledger.all());
        assert_eq!(reloaded.all()[1].status, TradeStatus::Failed);
    }

    #[tokio::test]
    async fn test_append_never_alters_previous_records() {
        let mut ledger = TradeLedger::load(Box::new(MemoryLedgerStore::default())).await.unwrap();
        ledger.append(buy("BTC")).await.unwrap();
        let before = ledger.all().to_vec();

        for symbol in ["ETH", "SOL", "ADA"] {
            ledger.append(buy(symbol)).await.unwrap();
        }

        assert_eq!(ledger.len(), before.len() + 3);
        assert_eq!(&ledger.all()[..before.len()], before.as_slice());
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_by_persist() {
        let store = MemoryLedgerStore::default();
        let mut ledger = TradeLedger::load(Box::new(store.clone())).await.unwrap();

        store.set_failing(true);
        assert_err!(ledger.append(buy("BTC")).await);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.unpersisted(), 1);
        assert_eq!(store.len(), 0);

        store.set_failing(false);
        assert_ok!(ledger.persist().await);
        assert_eq!(ledger.unpersisted(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_net_holdings() {
        let mut ledger = TradeLedger::load(Box::new(MemoryLedgerStore::default())).await.unwrap();
        ledger.append(buy("BTC")).await.unwrap();
        ledger
            .append(TradeRecord::completed("BTC", TradeAction::Sell, dec!(25), dec!(0.5), dec!(50)))
            .await
            .unwrap();
        ledger
            .append(TradeRecord::failed("BTC", TradeAction::Sell, dec!(100), dec!(50)))
            .await
            .unwrap();

        assert_eq!(ledger.net_holdings("BTC"), dec!(1.5));
        assert_eq!(ledger.open_buys().len(), 1);
        assert_eq!(ledger.net_holdings("ETH"), Decimal::ZERO);
    }
}
