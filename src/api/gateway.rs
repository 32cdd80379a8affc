//! Exchange seams used by the trading engine.
//!
//! Every call returns an explicit `Result<_, GatewayError>`; callers decide
//! per symbol whether a failure means "skip", "record failed" or "no balance".

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Failure talking to the exchange.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no data for {0}")]
    Unavailable(String),

    #[error("exchange not configured: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    /// Worth retrying an idempotent read.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub status: String,
}

/// Current spot price lookup.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Spot price in USD for `symbol`.
    async fn spot_price(&self, symbol: &str) -> Result<Decimal, GatewayError>;
}

/// Order placement and holdings.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Buy `amount_usd` worth of `symbol`.
    async fn buy(&self, symbol: &str, amount_usd: Decimal) -> Result<OrderReceipt, GatewayError>;

    /// Sell `crypto_amount` units of `symbol`.
    async fn sell(&self, symbol: &str, crypto_amount: Decimal) -> Result<OrderReceipt, GatewayError>;

    /// Units of `symbol` currently held.
    async fn balance(&self, symbol: &str) -> Result<Decimal, GatewayError>;
}
