use thiserror::Error;

use crate::ledger::LedgerError;

/// Failure that ends a cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no sentiment data: {0}")]
    NoInput(String),

    #[error("trade ledger could not be written: {0}")]
    Persistence(#[from] LedgerError),
}

impl CycleError {
    /// Journal status for a cycle that ended with this error.
    pub fn status(&self) -> &'static str {
        match self {
            CycleError::NoInput(_) => "aborted",
            CycleError::Persistence(_) => "failed",
        }
    }
}
