//! Coinbase v2 REST payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Every v2 response wraps its payload in `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Money amount as Coinbase encodes it (amount is a decimal string).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MoneyHash {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub currency: String,
}

/// `GET /v2/prices/{pair}/spot`
#[derive(Debug, Clone, Deserialize)]
pub struct SpotPrice {
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub currency: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

/// `GET /v2/accounts/{currency}`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub balance: MoneyHash,
}

/// Body of `POST /v2/accounts/{id}/buys` and `/sells`.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    pub amount: String,
    pub currency: String,
    pub commit: bool,
}

/// Buy or sell resource returned after placing an order.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferResponse {
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub amount: Option<MoneyHash>,
    pub total: Option<MoneyHash>,
}

/// Error body: `{"errors":[{"id":"...","message":"..."}]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorResponse {
    pub fn summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| format!("{}: {}", e.id, e.message))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
