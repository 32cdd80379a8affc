//! Data models for sentiment input, trading signals, and ledger records.

mod sentiment;
mod signal;
mod trade;

pub use sentiment::{RawSentimentRecord, SentimentRecord, SentimentRejection, SentimentScores};
pub use signal::{SignalSet, TradingSignal};
pub use trade::{TradeAction, TradeRecord};
#[cfg(test)]
pub use trade::TradeStatus;
