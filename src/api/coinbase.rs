//! Coinbase v2 REST client: spot prices, account balances, market buys and sells.
//!
//! Spot prices are public. Account and order endpoints are signed with the
//! API key scheme (`CB-ACCESS-*` headers, hex HMAC-SHA256 over
//! `timestamp + method + path + body`).

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::gateway::{ExchangeGateway, GatewayError, OrderReceipt, PriceSource};
use super::types::*;

type HmacSha256 = Hmac<Sha256>;

pub const COINBASE_URL: &str = "https://api.coinbase.com";
const API_VERSION: &str = "2024-01-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(10);

/// Crypto quantities are sent with at most this many decimals.
const QUANTITY_DP: u32 = 8;

#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

/// Client for the Coinbase v2 API.
pub struct CoinbaseClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl CoinbaseClient {
    /// Create a client. Without credentials only spot prices work.
    pub fn new(api_key: Option<String>, api_secret: Option<String>) -> anyhow::Result<Self> {
        Self::with_base_url(COINBASE_URL.to_string(), api_key, api_secret)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(
        base_url: String,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let credentials = match (api_key, api_secret) {
            (Some(api_key), Some(api_secret)) if !api_key.is_empty() && !api_secret.is_empty() => {
                Some(Credentials { api_key, api_secret })
            }
            _ => None,
        };

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Build from `COINBASE_API_KEY` / `COINBASE_API_SECRET`.
    pub fn from_env() -> anyhow::Result<Self> {
        let client = Self::new(
            std::env::var("COINBASE_API_KEY").ok(),
            std::env::var("COINBASE_API_SECRET").ok(),
        )?;
        if !client.has_credentials() {
            warn!("COINBASE_API_KEY / COINBASE_API_SECRET not set, orders will be refused");
        }
        Ok(client)
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| GatewayError::NotConfigured(format!("invalid API secret: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_headers(&self, method: &Method, path: &str, body: &str) -> Result<HeaderMap, GatewayError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| GatewayError::NotConfigured("missing Coinbase API credentials".to_string()))?;

        let timestamp = Utc::now().timestamp().to_string();
        let signature = Self::sign(&creds.api_secret, &timestamp, method.as_str(), path, body)?;

        let mut headers = HeaderMap::new();
        headers.insert("CB-ACCESS-KEY", header_value(&creds.api_key)?);
        headers.insert("CB-ACCESS-SIGN", header_value(&signature)?);
        headers.insert("CB-ACCESS-TIMESTAMP", header_value(&timestamp)?);
        headers.insert("CB-VERSION", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// GET with retry on transient failures.
    async fn get<T: DeserializeOwned>(&self, path: &str, signed: bool) -> Result<T, GatewayError> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        };

        backoff::future::retry(policy, || async move {
            self.get_once(path, signed).await.map_err(|e| {
                if e.is_transient() {
                    warn!(path = %path, error = %e, "Transient Coinbase error, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str, signed: bool) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Coinbase GET");

        let mut request = self.http.get(&url);
        if signed {
            request = request.headers(self.signed_headers(&Method::GET, path, "")?);
        }

        let response = request.send().await?;
        read_data(path, response).await
    }

    /// POST an order. Never retried: a timeout may still have filled.
    async fn post_order(&self, path: &str, body: &PlaceOrderRequest) -> Result<TransferResponse, GatewayError> {
        let payload = serde_json::to_string(body)
            .map_err(|e| GatewayError::Malformed(format!("order body: {}", e)))?;
        let headers = self.signed_headers(&Method::POST, path, &payload)?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, body = %payload, "Coinbase POST");

        let response = self.http.post(&url).headers(headers).body(payload).send().await?;

        match read_data(path, response).await {
            Err(GatewayError::Status { status, body, .. }) if (400..500).contains(&status) && status != 429 => {
                Err(GatewayError::Rejected(body))
            }
            other => other,
        }
    }

    async fn account(&self, symbol: &str) -> Result<AccountResponse, GatewayError> {
        self.get(&format!("/v2/accounts/{}", symbol), true).await
    }
}

#[async_trait]
impl PriceSource for CoinbaseClient {
    async fn spot_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let spot: SpotPrice = self.get(&format!("/v2/prices/{}-USD/spot", symbol), false).await?;
        Ok(spot.amount)
    }
}

#[async_trait]
impl ExchangeGateway for CoinbaseClient {
    async fn buy(&self, symbol: &str, amount_usd: Decimal) -> Result<OrderReceipt, GatewayError> {
        let account = self.account(symbol).await?;
        let request = PlaceOrderRequest {
            amount: amount_usd.round_dp(2).to_string(),
            currency: "USD".to_string(),
            commit: true,
        };

        let placed = self
            .post_order(&format!("/v2/accounts/{}/buys", account.id), &request)
            .await?;
        info!(symbol = %symbol, order_id = %placed.id, status = %placed.status, "Buy placed");

        Ok(OrderReceipt {
            order_id: placed.id,
            status: placed.status,
        })
    }

    async fn sell(&self, symbol: &str, crypto_amount: Decimal) -> Result<OrderReceipt, GatewayError> {
        let account = self.account(symbol).await?;
        let request = PlaceOrderRequest {
            amount: crypto_amount.round_dp(QUANTITY_DP).normalize().to_string(),
            currency: symbol.to_string(),
            commit: true,
        };

        let placed = self
            .post_order(&format!("/v2/accounts/{}/sells", account.id), &request)
            .await?;
        info!(symbol = %symbol, order_id = %placed.id, status = %placed.status, "Sell placed");

        Ok(OrderReceipt {
            order_id: placed.id,
            status: placed.status,
        })
    }

    async fn balance(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        match self.account(symbol).await {
            Ok(account) => Ok(account.balance.amount),
            Err(GatewayError::Status { status: 404, .. }) => Err(GatewayError::Unavailable(symbol.to_string())),
            Err(e) => Err(e),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value).map_err(|e| GatewayError::NotConfigured(format!("invalid header value: {}", e)))
}

/// Check status, then unwrap the `data` envelope.
async fn read_data<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|e| e.summary())
            .unwrap_or(body);
        return Err(GatewayError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: message,
        });
    }

    serde_json::from_str::<Envelope<T>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|e| GatewayError::Malformed(format!("{}: {}", endpoint, e)))
}
