//! Paper exchange used by `--dry-run`: fills every order at the spot price.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use super::gateway::{ExchangeGateway, GatewayError, OrderReceipt, PriceSource};

/// Simulated exchange with in-memory holdings.
pub struct PaperExchange {
    prices: Arc<dyn PriceSource>,
    holdings: RwLock<HashMap<String, Decimal>>,
    next_order: AtomicU64,
}

impl PaperExchange {
    #[cfg(test)]
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self {
            prices,
            holdings: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(1),
        }
    }

    /// Start from existing holdings, e.g. the ledger's net positions.
    pub fn with_holdings(prices: Arc<dyn PriceSource>, holdings: HashMap<String, Decimal>) -> Self {
        let holdings = holdings
            .into_iter()
            .filter(|(_, qty)| *qty > Decimal::ZERO)
            .collect();
        Self {
            prices,
            holdings: RwLock::new(holdings),
            next_order: AtomicU64::new(1),
        }
    }

    fn receipt(&self) -> OrderReceipt {
        let id = self.next_order.fetch_add(1, Ordering::Relaxed);
        OrderReceipt {
            order_id: format!("paper-{}", id),
            status: "completed".to_string(),
        }
    }

    async fn quote(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let price = self.prices.spot_price(symbol).await?;
        if price <= Decimal::ZERO {
            return Err(GatewayError::Unavailable(symbol.to_string()));
        }
        Ok(price)
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn buy(&self, symbol: &str, amount_usd: Decimal) -> Result<OrderReceipt, GatewayError> {
        let price = self.quote(symbol).await?;
        let quantity = amount_usd / price;

        *self.holdings.write().await.entry(symbol.to_string()).or_default() += quantity;

        info!(symbol = %symbol, quantity = %quantity.round_dp(8), price = %price, "[PAPER] Buy filled");
        Ok(self.receipt())
    }

    async fn sell(&self, symbol: &str, crypto_amount: Decimal) -> Result<OrderReceipt, GatewayError> {
        let price = self.quote(symbol).await?;

        let mut holdings = self.holdings.write().await;
        let held = holdings.get(symbol).copied().unwrap_or_default();
        if held < crypto_amount {
            return Err(GatewayError::Rejected(format!(
                "insufficient {} balance: have {}, need {}",
                symbol, held, crypto_amount
            )));
        }
        holdings.insert(symbol.to_string(), held - crypto_amount);
        drop(holdings);

        info!(symbol = %symbol, quantity = %crypto_amount.round_dp(8), price = %price, "[PAPER] Sell filled");
        Ok(self.receipt())
    }

    async fn balance(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        Ok(self.holdings.read().await.get(symbol).copied().unwrap_or_default())
    }
}
