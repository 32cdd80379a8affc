//! SQLite persistence.
//!
//! Stores everything needed to resume after restart:
//! - The append-only trade ledger (`trade_history`)
//! - A journal of cycles and their outcome (`cycle_runs`)
//! - The validated sentiment table each cycle ranked (`sentiment_snapshots`)
//!
//! Money columns are TEXT so decimals round-trip exactly.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::ledger::{LedgerError, LedgerStore};
use crate::models::{SentimentRecord, TradeRecord};

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Row of `trade_history` as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: String,
    pub amount_usd: String,
    pub crypto_amount: Option<String>,
    pub price: String,
    pub status: String,
}

impl TryFrom<StoredTrade> for TradeRecord {
    type Error = LedgerError;

    fn try_from(row: StoredTrade) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| LedgerError::Corrupt { row: row.id, reason };

        let decimal = |field: &str, value: &str| {
            Decimal::from_str(value).map_err(|e| corrupt(format!("{} '{}': {}", field, value, e)))
        };

        Ok(TradeRecord {
            timestamp: row.timestamp,
            symbol: row.symbol.clone(),
            action: row.action.parse().map_err(|e| corrupt(format!("{}", e)))?,
            amount_usd: decimal("amount_usd", &row.amount_usd)?,
            crypto_amount: row
                .crypto_amount
                .as_deref()
                .map(|v| decimal("crypto_amount", v))
                .transpose()?,
            price: decimal("price", &row.price)?,
            status: row.status.parse().map_err(|e| corrupt(format!("{}", e)))?,
        })
    }
}

/// One journalled cycle.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CycleRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub sentiment_rows: i64,
    pub buy_signals: i64,
    pub sell_signals: i64,
    pub orders_filled: i64,
    pub orders_rejected: i64,
    pub orders_skipped: i64,
    pub error_message: Option<String>,
}

/// Counters written when a cycle ends.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub sentiment_rows: usize,
    pub buy_signals: usize,
    pub sell_signals: usize,
    pub orders_filled: usize,
    pub orders_rejected: usize,
    pub orders_skipped: usize,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Trade ledger
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL CHECK (action IN ('buy', 'sell')),
                amount_usd TEXT NOT NULL,
                crypto_amount TEXT,
                price TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('completed', 'failed'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_history_symbol ON trade_history(symbol)")
            .execute(&self.pool)
            .await?;

        // The ledger is append-only
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS trade_history_no_update
            BEFORE UPDATE ON trade_history
            BEGIN
                SELECT RAISE(ABORT, 'trade_history is append-only');
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS trade_history_no_delete
            BEFORE DELETE ON trade_history
            BEGIN
                SELECT RAISE(ABORT, 'trade_history is append-only');
            END
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Cycle journal
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cycle_runs (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                sentiment_rows INTEGER NOT NULL DEFAULT 0,
                buy_signals INTEGER NOT NULL DEFAULT 0,
                sell_signals INTEGER NOT NULL DEFAULT 0,
                orders_filled INTEGER NOT NULL DEFAULT 0,
                orders_rejected INTEGER NOT NULL DEFAULT 0,
                orders_skipped INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Sentiment table ranked by each cycle
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sentiment_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id TEXT NOT NULL,
                entity TEXT NOT NULL,
                symbol TEXT NOT NULL,
                sentiment REAL NOT NULL,
                objectivity REAL NOT NULL,
                agreement REAL NOT NULL,
                confidence REAL NOT NULL,
                credibility REAL NOT NULL,
                composite_score REAL NOT NULL,
                scored_at TEXT NOT NULL,
                FOREIGN KEY (cycle_id) REFERENCES cycle_runs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Trade Ledger ====================

    /// All ledger rows, oldest first.
    pub async fn get_trades(&self) -> Result<Vec<StoredTrade>, sqlx::Error> {
        sqlx::query_as::<_, StoredTrade>(
            r#"
            SELECT id, timestamp, symbol, action, amount_usd, crypto_amount, price, status
            FROM trade_history ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Insert one ledger row.
    pub async fn insert_trade(&self, record: &TradeRecord) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_history
                (timestamp, symbol, action, amount_usd, crypto_amount, price, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.timestamp)
        .bind(&record.symbol)
        .bind(record.action.as_str())
        .bind(record.amount_usd.to_string())
        .bind(record.crypto_amount.map(|q| q.to_string()))
        .bind(record.price.to_string())
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    // ==================== Cycle Journal ====================

    /// Open a journal entry for a cycle.
    pub async fn start_cycle(&self, cycle_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO cycle_runs (id, started_at) VALUES (?, ?)")
            .bind(cycle_id)
            .bind(started_at)
            .execute(&self.pool)
            .await
            .context("Failed to journal cycle start")?;

        Ok(())
    }

    /// Close a journal entry with its final status.
    pub async fn finish_cycle(
        &self,
        cycle_id: &str,
        status: &str,
        summary: &CycleSummary,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cycle_runs SET
                finished_at = ?,
                status = ?,
                sentiment_rows = ?,
                buy_signals = ?,
                sell_signals = ?,
                orders_filled = ?,
                orders_rejected = ?,
                orders_skipped = ?,
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(status)
        .bind(summary.sentiment_rows as i64)
        .bind(summary.buy_signals as i64)
        .bind(summary.sell_signals as i64)
        .bind(summary.orders_filled as i64)
        .bind(summary.orders_rejected as i64)
        .bind(summary.orders_skipped as i64)
        .bind(error_message)
        .bind(cycle_id)
        .execute(&self.pool)
        .await
        .context("Failed to journal cycle end")?;

        Ok(())
    }

    /// Most recent cycles first.
    pub async fn recent_cycles(&self, limit: i64) -> Result<Vec<CycleRun>> {
        sqlx::query_as::<_, CycleRun>("SELECT * FROM cycle_runs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch cycle journal")
    }

    /// Store the sentiment table a cycle ranked, with each composite score.
    pub async fn save_sentiment_snapshot(
        &self,
        cycle_id: &str,
        rows: &[(SentimentRecord, f64)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (record, composite) in rows {
            sqlx::query(
                r#"
                INSERT INTO sentiment_snapshots
                    (cycle_id, entity, symbol, sentiment, objectivity, agreement,
                     confidence, credibility, composite_score, scored_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(cycle_id)
            .bind(&record.entity)
            .bind(&record.symbol)
            .bind(record.scores.sentiment)
            .bind(record.scores.objectivity)
            .bind(record.scores.agreement)
            .bind(record.scores.confidence)
            .bind(record.scores.credibility)
            .bind(*composite)
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("Failed to store sentiment snapshot")?;
        Ok(())
    }

    /// Number of snapshot rows stored for a cycle.
    #[cfg(test)]
    pub async fn snapshot_count(&self, cycle_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sentiment_snapshots WHERE cycle_id = ?")
            .bind(cycle_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn load_all(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        self.get_trades()
            .await?
            .into_iter()
            .map(TradeRecord::try_from)
            .collect()
    }

    async fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        self.insert_trade(record).await?;
        Ok(())
    }
}
