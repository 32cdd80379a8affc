//! Trading configuration.

use std::time::Duration;

use anyhow::{ensure, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::SentimentScores;

/// Weights of the five sentiment dimensions in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub sentiment: f64,
    pub objectivity: f64,
    pub agreement: f64,
    pub confidence: f64,
    pub credibility: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            sentiment: 0.30,
            objectivity: 0.20,
            agreement: 0.20,
            confidence: 0.15,
            credibility: 0.15,
        }
    }
}

impl ScoreWeights {
    /// Weighted sum of the five scores.
    pub fn composite(&self, scores: &SentimentScores) -> f64 {
        scores.sentiment * self.sentiment
            + scores.objectivity * self.objectivity
            + scores.agreement * self.agreement
            + scores.confidence * self.confidence
            + scores.credibility * self.credibility
    }

    pub fn total(&self) -> f64 {
        self.sentiment + self.objectivity + self.agreement + self.confidence + self.credibility
    }

    fn all_non_negative(&self) -> bool {
        [
            self.sentiment,
            self.objectivity,
            self.agreement,
            self.confidence,
            self.credibility,
        ]
        .iter()
        .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// Static configuration for one trading engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Fixed notional per order in USD
    pub amount_usd: Decimal,

    /// Forced sell when price is this many percent below purchase (5 = 5%)
    pub stop_loss_pct: Decimal,

    /// Forced sell when price is this many percent above purchase (10 = 10%)
    pub take_profit_pct: Decimal,

    /// Number of highest-ranked symbols to buy
    pub top_n: usize,

    /// Number of lowest-ranked symbols to sell
    pub bottom_n: usize,

    /// Minimum spacing between successive exchange orders
    pub order_delay_ms: u64,

    /// Composite score weights
    pub weights: ScoreWeights,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            amount_usd: dec!(100),     // $100 per order
            stop_loss_pct: dec!(5),    // 5% below purchase
            take_profit_pct: dec!(10), // 10% above purchase
            top_n: 3,
            bottom_n: 3,
            order_delay_ms: 1000,
            weights: ScoreWeights::default(),
        }
    }
}

impl TradingConfig {
    pub fn order_delay(&self) -> Duration {
        Duration::from_millis(self.order_delay_ms)
    }

    /// Reject configurations the engine cannot trade with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.amount_usd > Decimal::ZERO,
            "amount_usd must be positive, got {}",
            self.amount_usd
        );
        ensure!(
            self.stop_loss_pct > Decimal::ZERO,
            "stop_loss_pct must be positive, got {}",
            self.stop_loss_pct
        );
        ensure!(
            self.take_profit_pct > Decimal::ZERO,
            "take_profit_pct must be positive, got {}",
            self.take_profit_pct
        );
        ensure!(
            self.weights.all_non_negative(),
            "score weights must be finite and non-negative"
        );
        ensure!(
            (self.weights.total() - 1.0).abs() <= 1e-9,
            "score weights must sum to 1.0, got {}",
            self.weights.total()
        );
        Ok(())
    }
}
