//! Performance metrics computed from the trade ledger.

mod calculator;

pub use calculator::{PerformanceCalculator, PerformanceStats};
