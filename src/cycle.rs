//! Cycle runner: one full pass of ranking, risk exits and order execution.
//!
//! Handles:
//! - Reading and validating the sentiment table
//! - Ranking it into buy and sell signals
//! - Executing risk exits and signals through the order executor
//! - Journalling the cycle and sending the trade alert and performance summary

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::{ExchangeGateway, PriceSource};
use crate::db::{CycleSummary, Database};
use crate::ledger::TradeLedger;
use crate::metrics::{PerformanceCalculator, PerformanceStats};
use crate::models::SignalSet;
use crate::notify::{self, Notifier};
use crate::sentiment::{self, SentimentSource};
use crate::trading::{CycleError, ExecutionReport, OrderExecutor, SignalRanker, TradingConfig};

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: String,
    pub signals: SignalSet,
    pub report: ExecutionReport,
    pub stats: PerformanceStats,
}

/// Owns every component a cycle needs. Cycles never overlap.
pub struct TradingCycle {
    config: TradingConfig,
    sentiment: Box<dyn SentimentSource>,
    ranker: SignalRanker,
    executor: OrderExecutor,
    notifier: Arc<dyn Notifier>,
    ledger: TradeLedger,
    journal: Option<Database>,
}

impl TradingCycle {
    pub fn new(
        config: TradingConfig,
        sentiment: Box<dyn SentimentSource>,
        exchange: Arc<dyn ExchangeGateway>,
        prices: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
        ledger: TradeLedger,
    ) -> Self {
        let ranker = SignalRanker::new(config.weights);
        let executor = OrderExecutor::new(config.clone(), exchange, prices, notifier.clone());
        Self {
            config,
            sentiment,
            ranker,
            executor,
            notifier,
            ledger,
            journal: None,
        }
    }

    /// Record cycles and sentiment snapshots in `db`.
    pub fn with_journal(mut self, db: Database) -> Self {
        self.journal = Some(db);
        self
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    /// Run one cycle to completion.
    pub async fn run_once(&mut self) -> Result<CycleOutcome, CycleError> {
        let cycle_id = Uuid::new_v4().to_string();
        info!(cycle_id = %cycle_id, source = %self.sentiment.describe(), "Starting trading cycle");

        if let Some(db) = &self.journal {
            if let Err(e) = db.start_cycle(&cycle_id, Utc::now()).await {
                warn!(cycle_id = %cycle_id, error = %e, "Could not journal cycle start");
            }
        }

        let mut summary = CycleSummary::default();
        let result = self.execute_cycle(&cycle_id, &mut summary).await;

        let (status, message) = match &result {
            Ok(_) => ("completed", None),
            Err(e) => {
                error!(cycle_id = %cycle_id, error = %e, "Trading cycle ended early");
                (e.status(), Some(e.to_string()))
            }
        };

        if let Some(db) = &self.journal {
            if let Err(e) = db.finish_cycle(&cycle_id, status, &summary, message.as_deref()).await {
                warn!(cycle_id = %cycle_id, error = %e, "Could not journal cycle end");
            }
        }

        result
    }

    async fn execute_cycle(&mut self, cycle_id: &str, summary: &mut CycleSummary) -> Result<CycleOutcome, CycleError> {
        // Records left over from a failed write go first.
        if let Err(e) = self.ledger.persist().await {
            self.notifier
                .notify_error(&format!(
                    "{} ledger records are still unwritten ({}); no orders placed",
                    self.ledger.unpersisted(),
                    e
                ))
                .await;
            return Err(CycleError::Persistence(e));
        }

        // 1. Sentiment input
        let rows = match self.sentiment.fetch().await {
            Ok(rows) => rows,
            Err(e) => return Err(self.abort_no_input(format!("{:#}", e)).await),
        };
        let table = sentiment::validate_rows(rows);
        summary.sentiment_rows = table.records.len();
        if table.is_empty() {
            let reason = format!(
                "{} returned no usable rows ({} rejected)",
                self.sentiment.describe(),
                table.rejected.len()
            );
            return Err(self.abort_no_input(reason).await);
        }

        // 2. Ranking
        if let Some(db) = &self.journal {
            let snapshot: Vec<_> = table
                .records
                .iter()
                .map(|r| (r.clone(), self.ranker.composite(r)))
                .collect();
            if let Err(e) = db.save_sentiment_snapshot(cycle_id, &snapshot).await {
                warn!(cycle_id = %cycle_id, error = %e, "Could not store sentiment snapshot");
            }
        }

        let signals = self
            .ranker
            .rank(&table.records, self.config.top_n, self.config.bottom_n);
        summary.buy_signals = signals.buys.len();
        summary.sell_signals = signals.sells.len();
        info!(
            cycle_id = %cycle_id,
            buys = ?signals.buy_symbols(),
            sells = ?signals.sell_symbols(),
            "Signals ranked"
        );

        self.notifier
            .notify_summary(&notify::format_signal_alert(&signals, &self.config))
            .await;

        // 3. Risk exits and orders
        let report = self
            .executor
            .execute(&signals.buy_symbols(), &signals.sell_symbols(), &mut self.ledger)
            .await?;
        summary.orders_filled = report.filled();
        summary.orders_rejected = report.rejected();
        summary.orders_skipped = report.skipped();

        // 4. Performance update
        let stats = PerformanceCalculator::calculate(self.ledger.all());
        self.notifier.notify_summary(&stats.to_string()).await;

        info!(cycle_id = %cycle_id, result = %report, "Trading cycle complete");

        Ok(CycleOutcome {
            cycle_id: cycle_id.to_string(),
            signals,
            report,
            stats,
        })
    }

    async fn abort_no_input(&self, reason: String) -> CycleError {
        self.notifier
            .notify_error(&format!("Trading cycle aborted before any trade: {}", reason))
            .await;
        CycleError::NoInput(reason)
    }

    /// Run a cycle now and then every `every` until Ctrl+C.
    ///
    /// A cycle in progress always finishes before shutdown.
    pub async fn run(&mut self, every: Duration) -> Result<()> {
        info!(interval_secs = every.as_secs(), "Starting periodic runner");

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Failures are already notified and journalled.
                    let _ = self.run_once().await;
                }
                signal = &mut shutdown => {
                    if let Err(e) = signal {
                        warn!(error = %e, "Could not listen for Ctrl+C");
                    }
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!(records = self.ledger.len(), "Periodic runner stopped");
        Ok(())
    }
}
