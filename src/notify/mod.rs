//! Notification sinks. Delivery is fire-and-forget: nothing here can fail a cycle.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::models::{SignalSet, TradeAction};
use crate::trading::TradingConfig;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound human-readable notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// An order is about to be sent.
    async fn notify_trade(&self, symbol: &str, action: TradeAction, amount_usd: Decimal, price: Decimal);

    /// A cycle-level failure.
    async fn notify_error(&self, message: &str);

    /// Free-form summary (trade alert, performance update).
    async fn notify_summary(&self, text: &str);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_trade(&self, symbol: &str, action: TradeAction, amount_usd: Decimal, price: Decimal) {
        info!(
            symbol = %symbol,
            action = %action,
            amount_usd = %amount_usd.round_dp(2),
            price = %price,
            "Trade alert"
        );
    }

    async fn notify_error(&self, message: &str) {
        error!(message = %message, "Trading engine error alert");
    }

    async fn notify_summary(&self, text: &str) {
        info!("\n{}", text);
    }
}

/// Posts `{"text": ...}` to a chat webhook (Slack / Discord compatible).
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self { http, url: url.into() })
    }

    async fn post(&self, text: String) {
        let body = json!({ "text": text });
        match self.http.post(&self.url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => debug!("Webhook notification delivered"),
            Ok(resp) => warn!(status = %resp.status(), "Webhook rejected notification"),
            Err(e) => warn!(error = %e, "Failed to deliver webhook notification"),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_trade(&self, symbol: &str, action: TradeAction, amount_usd: Decimal, price: Decimal) {
        self.post(format_trade_alert(symbol, action, amount_usd, price)).await;
    }

    async fn notify_error(&self, message: &str) {
        self.post(format_error_alert(message)).await;
    }

    async fn notify_summary(&self, text: &str) {
        self.post(text.to_string()).await;
    }
}

/// Pick the webhook sink when a URL is configured, the log sink otherwise.
pub fn from_env() -> anyhow::Result<Box<dyn Notifier>> {
    match std::env::var("NOTIFY_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => {
            info!("Notifications go to webhook");
            Ok(Box::new(WebhookNotifier::new(url.trim())?))
        }
        _ => Ok(Box::new(LogNotifier)),
    }
}

pub fn format_trade_alert(symbol: &str, action: TradeAction, amount_usd: Decimal, price: Decimal) -> String {
    format!(
        "Trade alert: {} {}\nAmount: ${:.2} USD\nPrice: ${:.2}\nTime: {}\nThis trade will be executed shortly.",
        action.as_str().to_uppercase(),
        symbol,
        amount_usd,
        price,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

pub fn format_error_alert(message: &str) -> String {
    format!(
        "Trading engine error\nTime: {}\nError: {}\nPlease check the system.",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        message,
    )
}

/// Summary of the ranker's decisions sent before any order is placed.
pub fn format_signal_alert(signals: &SignalSet, config: &TradingConfig) -> String {
    let mut out = String::from("Sentiment trade alert\n");

    let _ = writeln!(out, "\nBuy signals:");
    if signals.buys.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for s in &signals.buys {
        let _ = writeln!(out, "  {:<8} composite {:>6.2}", s.symbol, s.composite_score);
    }

    let _ = writeln!(out, "\nSell signals:");
    if signals.sells.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for s in &signals.sells {
        let _ = writeln!(out, "  {:<8} composite {:>6.2}", s.symbol, s.composite_score);
    }

    let _ = writeln!(
        out,
        "\nNotional per order: ${}\nStop-loss: {}%\nTake-profit: {}%",
        config.amount_usd, config.stop_loss_pct, config.take_profit_pct
    );
    out
}
