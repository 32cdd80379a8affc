//! Sentiment ranking: composite score per entity, top buys and bottom sells.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::models::{SentimentRecord, SignalSet, TradeAction, TradingSignal};

use super::ScoreWeights;

/// Ranks a sentiment table into buy and sell signals.
#[derive(Debug, Clone)]
pub struct SignalRanker {
    weights: ScoreWeights,
}

/// Entity with its composite score, as sorted by the ranker.
#[derive(Debug, Clone)]
pub struct ScoredEntity<'a> {
    pub record: &'a SentimentRecord,
    pub composite_score: f64,
}

impl SignalRanker {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn composite(&self, record: &SentimentRecord) -> f64 {
        self.weights.composite(&record.scores)
    }

    /// Score and sort the table, best first.
    ///
    /// One entry per symbol: for duplicates the latest timestamp wins, then
    /// the higher composite. Ties in the sort are broken by symbol so the
    /// order does not depend on the input order.
    pub fn score<'a>(&self, records: &'a [SentimentRecord]) -> Vec<ScoredEntity<'a>> {
        let mut by_symbol: HashMap<&str, ScoredEntity<'a>> = HashMap::new();

        for record in records {
            let candidate = ScoredEntity {
                record,
                composite_score: self.composite(record),
            };
            let replace = by_symbol
                .get(record.symbol.as_str())
                .map_or(true, |existing| supersedes(&candidate, existing));

            if replace {
                by_symbol.insert(record.symbol.as_str(), candidate);
            } else {
                debug!(symbol = %record.symbol, "Ignoring older duplicate sentiment row");
            }
        }

        let mut scored: Vec<_> = by_symbol.into_values().collect();
        scored.sort_by(|a, b| {
            b.composite_score
                .total_cmp(&a.composite_score)
                .then_with(|| a.record.symbol.cmp(&b.record.symbol))
        });
        scored
    }

    /// Pick `top_n` buys and `bottom_n` sells.
    ///
    /// Symbols chosen for buying are removed from the sell pool, so the two
    /// lists never share a symbol even when the table is small.
    pub fn rank(&self, records: &[SentimentRecord], top_n: usize, bottom_n: usize) -> SignalSet {
        let scored = self.score(records);

        let buy_count = top_n.min(scored.len());
        let (buy_pool, sell_pool) = scored.split_at(buy_count);

        let buys = buy_pool
            .iter()
            .map(|e| signal(e, TradeAction::Buy))
            .collect();

        let sells = sell_pool
            .iter()
            .rev()
            .take(bottom_n)
            .map(|e| signal(e, TradeAction::Sell))
            .collect();

        SignalSet { buys, sells }
    }
}

fn supersedes(candidate: &ScoredEntity<'_>, existing: &ScoredEntity<'_>) -> bool {
    match candidate.record.timestamp.cmp(&existing.record.timestamp) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.composite_score > existing.composite_score,
    }
}

fn signal(entity: &ScoredEntity<'_>, action: TradeAction) -> TradingSignal {
    TradingSignal {
        symbol: entity.record.symbol.clone(),
        action,
        composite_score: entity.composite_score,
    }
}
