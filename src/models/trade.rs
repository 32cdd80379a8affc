//! Trade ledger record: one row per order the engine placed (or tried to).

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            other => Err(anyhow!("unknown trade action '{}'", other)),
        }
    }
}

/// Outcome of the exchange call that produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Completed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Completed => "completed",
            TradeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "completed" => Ok(TradeStatus::Completed),
            "failed" => Ok(TradeStatus::Failed),
            other => Err(anyhow!("unknown trade status '{}'", other)),
        }
    }
}

/// Immutable ledger entry.
///
/// Created right after the exchange call returns and never edited. A sell that
/// closes a position is its own record, not a change to the original buy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// When the exchange call returned
    pub timestamp: DateTime<Utc>,

    /// Ticker symbol (upper case, e.g. "BTC")
    pub symbol: String,

    /// Trade direction
    pub action: TradeAction,

    /// Notional in USD that was sent (or attempted)
    pub amount_usd: Decimal,

    /// Asset quantity; `None` when no fill happened
    pub crypto_amount: Option<Decimal>,

    /// Spot price quoted just before the order
    pub price: Decimal,

    /// Whether the exchange accepted the order
    pub status: TradeStatus,
}

impl TradeRecord {
    /// Record for an order the exchange accepted.
    pub fn completed(
        symbol: &str,
        action: TradeAction,
        amount_usd: Decimal,
        crypto_amount: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            action,
            amount_usd,
            crypto_amount: Some(crypto_amount),
            price,
            status: TradeStatus::Completed,
        }
    }

    /// Record for an order the exchange refused or that errored in transit.
    pub fn failed(symbol: &str, action: TradeAction, amount_usd: Decimal, price: Decimal) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            action,
            amount_usd,
            crypto_amount: None,
            price,
            status: TradeStatus::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TradeStatus::Completed
    }

    pub fn is_completed_buy(&self) -> bool {
        self.is_completed() && self.action == TradeAction::Buy
    }

    pub fn is_completed_sell(&self) -> bool {
        self.is_completed() && self.action == TradeAction::Sell
    }

    /// Asset quantity moved by this record, zero when nothing filled.
    pub fn filled_quantity(&self) -> Decimal {
        if self.is_completed() {
            self.crypto_amount.unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    }

    /// Percentage move from this record's price to `current_price`.
    pub fn change_pct(&self, current_price: Decimal) -> Option<Decimal> {
        if self.price <= Decimal::ZERO {
            return None;
        }
        Some((current_price - self.price) / self.price * Decimal::ONE_HUNDRED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_action_and_status_parse() {
        assert_eq!("BUY".parse::<TradeAction>().unwrap(), TradeAction::Buy);
        assert_eq!(" sell ".parse::<TradeAction>().unwrap(), TradeAction::Sell);
        assert!("hold".parse::<TradeAction>().is_err());

        assert_eq!("completed".parse::<TradeStatus>().unwrap(), TradeStatus::Completed);
        assert_eq!("Failed".parse::<TradeStatus>().unwrap(), TradeStatus::Failed);
        assert!("pending".parse::<TradeStatus>().is_err());
    }

    #[test]
    fn test_failed_record_has_no_fill() {
        let record = TradeRecord::failed("ETH", TradeAction::Buy, dec!(100), dec!(2500));

        assert_eq!(record.status, TradeStatus::Failed);
        assert_eq!(record.crypto_amount, None);
        assert_eq!(record.filled_quantity(), Decimal::ZERO);
        assert!(!record.is_completed_buy());
    }

    #[test]
    fn test_change_pct() {
        let record = TradeRecord::completed("SOL", TradeAction::Buy, dec!(100), dec!(1), dec!(100));

        assert_eq!(record.change_pct(dec!(94)), Some(dec!(-6)));
        assert_eq!(record.change_pct(dec!(110)), Some(dec!(10)));

        let broken = TradeRecord { price: Decimal::ZERO, ..record };
        assert_eq!(broken.change_pct(dec!(1)), None);
    }
}
