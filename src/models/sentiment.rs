//! Per-entity sentiment scores as delivered by the scoring collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest allowed score.
pub const SCORE_MIN: f64 = 0.0;
/// Highest allowed score.
pub const SCORE_MAX: f64 = 100.0;

/// The five bounded sentiment dimensions, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScores {
    /// 0 = extremely negative, 100 = extremely positive
    pub sentiment: f64,
    /// 0 = highly subjective, 100 = completely objective
    pub objectivity: f64,
    /// 0 = strong disagreement between sources, 100 = strong agreement
    pub agreement: f64,
    /// 0 = highly uncertain, 100 = extremely confident
    pub confidence: f64,
    /// 0 = not credible, 100 = highly credible
    pub credibility: f64,
}

/// Validated sentiment row for one entity in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub entity: String,
    pub symbol: String,
    pub scores: SentimentScores,
    pub timestamp: DateTime<Utc>,
}

/// Row as it arrives from the outside: any score may be missing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSentimentRecord {
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, alias = "sentiment_score")]
    pub sentiment: Option<f64>,
    #[serde(default, alias = "objectivity_score")]
    pub objectivity: Option<f64>,
    #[serde(default, alias = "agreement_score")]
    pub agreement: Option<f64>,
    #[serde(default, alias = "confidence_score")]
    pub confidence: Option<f64>,
    #[serde(default, alias = "credibility_score")]
    pub credibility: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Why a raw row was excluded from ranking.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SentimentRejection {
    #[error("row has no symbol")]
    MissingSymbol,
    #[error("{0} score is missing")]
    MissingScore(&'static str),
    #[error("{field} score {value} is outside [0, 100]")]
    OutOfRange { field: &'static str, value: f64 },
}

impl RawSentimentRecord {
    /// Validate into a [`SentimentRecord`].
    ///
    /// The symbol is upper-cased; a missing timestamp becomes "now".
    pub fn validate(self) -> Result<SentimentRecord, SentimentRejection> {
        let symbol = self.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(SentimentRejection::MissingSymbol);
        }

        let scores = SentimentScores {
            sentiment: bounded("sentiment", self.sentiment)?,
            objectivity: bounded("objectivity", self.objectivity)?,
            agreement: bounded("agreement", self.agreement)?,
            confidence: bounded("confidence", self.confidence)?,
            credibility: bounded("credibility", self.credibility)?,
        };

        let entity = if self.entity.trim().is_empty() {
            symbol.clone()
        } else {
            self.entity.trim().to_string()
        };

        Ok(SentimentRecord {
            entity,
            symbol,
            scores,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

fn bounded(field: &'static str, value: Option<f64>) -> Result<f64, SentimentRejection> {
    let value = value.ok_or(SentimentRejection::MissingScore(field))?;
    if !value.is_finite() || !(SCORE_MIN..=SCORE_MAX).contains(&value) {
        return Err(SentimentRejection::OutOfRange { field, value });
    }
    Ok(value)
}
