//! Trading logic: ranking, risk exits and order execution.

mod config;
mod error;
mod executor;
mod ranker;
mod risk;

pub use config::{ScoreWeights, TradingConfig};
pub use error::CycleError;
pub use executor::{ExecutionReport, OrderExecutor, OrderOutcome};
pub use ranker::SignalRanker;
pub use risk::open_buys;
