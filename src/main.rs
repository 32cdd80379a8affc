//! Sentiment-driven crypto trading engine
//!
//! Ranks symbols by a weighted sentiment composite, buys the top of the
//! table, sells the bottom, and enforces stop-loss / take-profit exits on
//! every open buy in the trade ledger.

mod api;
mod cycle;
mod db;
mod ledger;
mod metrics;
mod models;
mod notify;
mod sentiment;
mod trading;

#[cfg(test)]
mod testing;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{CoinbaseClient, ExchangeGateway, PaperExchange, PriceSource};
use crate::cycle::TradingCycle;
use crate::db::Database;
use crate::ledger::TradeLedger;
use crate::metrics::PerformanceCalculator;
use crate::notify::Notifier;
use crate::sentiment::{HttpSentimentSource, JsonFileSource, SentimentSource};
use crate::trading::{OrderOutcome, TradingConfig};

/// Sentiment trading engine CLI.
#[derive(Parser)]
#[command(name = "sentitrade")]
#[command(about = "Trade crypto on weighted sentiment rankings", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./sentitrade.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    trading: TradingArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TradingArgs {
    /// USD notional per order
    #[arg(long, env = "TRADE_AMOUNT_USD", default_value = "100", global = true)]
    amount_usd: Decimal,

    /// Stop-loss threshold in percent below purchase price
    #[arg(long, env = "STOP_LOSS_PERCENTAGE", default_value = "5", global = true)]
    stop_loss: Decimal,

    /// Take-profit threshold in percent above purchase price
    #[arg(long, env = "TAKE_PROFIT_PERCENTAGE", default_value = "10", global = true)]
    take_profit: Decimal,

    /// Number of top-ranked symbols to buy
    #[arg(long, env = "TOP_ENTITIES_TO_BUY", default_value = "3", global = true)]
    top: usize,

    /// Number of bottom-ranked symbols to sell
    #[arg(long, env = "BOTTOM_ENTITIES_TO_SELL", default_value = "3", global = true)]
    bottom: usize,

    /// Delay between successive orders in milliseconds
    #[arg(long, env = "ORDER_DELAY_MS", default_value = "1000", global = true)]
    order_delay_ms: u64,
}

impl TradingArgs {
    fn to_config(&self) -> Result<TradingConfig> {
        let config = TradingConfig {
            amount_usd: self.amount_usd,
            stop_loss_pct: self.stop_loss,
            take_profit_pct: self.take_profit,
            top_n: self.top,
            bottom_n: self.bottom,
            order_delay_ms: self.order_delay_ms,
            ..TradingConfig::default()
        };
        config.validate().context("invalid trading configuration")?;
        Ok(config)
    }
}

#[derive(Args)]
struct RunArgs {
    /// JSON file with the sentiment table
    #[arg(long, env = "SENTIMENT_FILE", conflicts_with = "sentiment_url")]
    sentiment_file: Option<String>,

    /// HTTP endpoint serving the sentiment table as JSON
    #[arg(long, env = "SENTIMENT_URL")]
    sentiment_url: Option<String>,

    /// Fill orders against a paper exchange instead of Coinbase
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single trading cycle
    Cycle {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Run a cycle now and then periodically until Ctrl+C
    Run {
        #[command(flatten)]
        run: RunArgs,

        /// Hours between cycles
        #[arg(long, default_value = "168")]
        interval_hours: u64,
    },

    /// Print the trade ledger
    Ledger {
        /// Only show the most recent N records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show open buys with entry and current price
    Positions,

    /// Show performance statistics from the ledger
    Stats,

    /// Show recent trading cycles
    Cycles {
        /// Number of cycles to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Print the effective trading configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.trading.to_config()?;

    match cli.command {
        Commands::Cycle { run } => {
            let db = Database::new(&cli.database).await?;
            let mut cycle = build_cycle(&config, &run, db).await?;

            let outcome = cycle.run_once().await?;

            println!("\n=== Cycle {} ===", outcome.cycle_id);
            println!("Buy signals:  {}", join_symbols(&outcome.signals.buy_symbols()));
            println!("Sell signals: {}", join_symbols(&outcome.signals.sell_symbols()));

            if !outcome.report.orders.is_empty() {
                println!("\n{:<8} {:<6} {:<12} {:>10}  RESULT", "SYMBOL", "SIDE", "ORIGIN", "USD");
                println!("{}", "-".repeat(60));
                for order in &outcome.report.orders {
                    let result = match &order.outcome {
                        OrderOutcome::Filled { crypto_amount, price, .. } => {
                            format!("filled {} @ {:.2}", crypto_amount, price)
                        }
                        OrderOutcome::Rejected(reason) => format!("rejected: {}", reason),
                        OrderOutcome::Skipped(reason) => format!("skipped: {}", reason),
                    };
                    println!(
                        "{:<8} {:<6} {:<12} {:>10.2}  {}",
                        order.symbol,
                        order.action,
                        format!("{:?}", order.origin),
                        order.amount_usd,
                        result
                    );
                }
            }

            println!("\nOrders: {}", outcome.report);
            println!("\n{}", outcome.stats);
        }

        Commands::Run { run, interval_hours } => {
            if interval_hours == 0 {
                bail!("--interval-hours must be at least 1");
            }

            info!(
                interval_hours = interval_hours,
                dry_run = run.dry_run,
                amount_usd = %config.amount_usd,
                "Starting sentiment trader"
            );

            let db = Database::new(&cli.database).await?;
            let mut cycle = build_cycle(&config, &run, db).await?;
            cycle
                .run(Duration::from_secs(interval_hours * 3600))
                .await?;

            println!("\n{}", PerformanceCalculator::calculate(cycle.ledger().all()));
        }

        Commands::Ledger { limit } => {
            let db = Database::new(&cli.database).await?;
            let ledger = TradeLedger::load(Box::new(db)).await?;

            if ledger.is_empty() {
                println!("No trades recorded yet. Use 'sentitrade cycle' to run one.");
                return Ok(());
            }

            let records = ledger.all();
            let start = limit.map(|n| records.len().saturating_sub(n)).unwrap_or(0);

            println!(
                "\n{:<20} {:<8} {:<5} {:>10} {:>16} {:>12} {:<9}",
                "TIME", "SYMBOL", "SIDE", "USD", "QUANTITY", "PRICE", "STATUS"
            );
            println!("{}", "-".repeat(86));

            for record in &records[start..] {
                let quantity = record
                    .crypto_amount
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<20} {:<8} {:<5} {:>10.2} {:>16} {:>12.2} {:<9}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.symbol,
                    record.action,
                    record.amount_usd,
                    quantity,
                    record.price,
                    record.status
                );
            }
        }

        Commands::Positions => {
            let db = Database::new(&cli.database).await?;
            let ledger = TradeLedger::load(Box::new(db)).await?;
            let open = ledger.open_buys();

            if open.is_empty() {
                println!("No open positions.");
                return Ok(());
            }

            let prices = CoinbaseClient::from_env()?;

            println!(
                "\n{:<8} {:<20} {:>10} {:>14} {:>12} {:>12} {:>9}",
                "SYMBOL", "BOUGHT", "USD", "QUANTITY", "ENTRY", "CURRENT", "CHANGE"
            );
            println!("{}", "-".repeat(91));

            for buy in open {
                let (current, change) = match prices.spot_price(&buy.symbol).await {
                    Ok(price) => (
                        format!("{:.2}", price),
                        buy.change_pct(price)
                            .map(|pct| format!("{:+.2}%", pct))
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                    Err(e) => {
                        warn!(symbol = %buy.symbol, error = %e, "No current price");
                        ("-".to_string(), "-".to_string())
                    }
                };

                println!(
                    "{:<8} {:<20} {:>10.2} {:>14} {:>12.2} {:>12} {:>9}",
                    buy.symbol,
                    buy.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    buy.amount_usd,
                    buy.filled_quantity(),
                    buy.price,
                    current,
                    change
                );
            }
        }

        Commands::Stats => {
            let db = Database::new(&cli.database).await?;
            let ledger = TradeLedger::load(Box::new(db)).await?;
            println!("\n{}", PerformanceCalculator::calculate(ledger.all()));
        }

        Commands::Cycles { limit } => {
            let db = Database::new(&cli.database).await?;
            let cycles = db.recent_cycles(limit).await?;

            if cycles.is_empty() {
                println!("No cycles recorded yet.");
                return Ok(());
            }

            println!(
                "\n{:<36} {:<20} {:>7} {:<10} {:>5} {:>4} {:>4} {:>7} {:>5} {:>5}",
                "CYCLE", "STARTED", "TOOK", "STATUS", "ROWS", "BUY", "SELL", "FILLED", "REJ", "SKIP"
            );
            println!("{}", "-".repeat(118));

            for run in cycles {
                let took = run
                    .finished_at
                    .map(|end| format!("{}s", (end - run.started_at).num_seconds()))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<36} {:<20} {:>7} {:<10} {:>5} {:>4} {:>4} {:>7} {:>5} {:>5}",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    took,
                    run.status,
                    run.sentiment_rows,
                    run.buy_signals,
                    run.sell_signals,
                    run.orders_filled,
                    run.orders_rejected,
                    run.orders_skipped
                );
                if let Some(message) = &run.error_message {
                    println!("  {}", message);
                }
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Wire the sentiment source, exchange, notifier and ledger into a cycle.
async fn build_cycle(config: &TradingConfig, run: &RunArgs, db: Database) -> Result<TradingCycle> {
    let sentiment: Box<dyn SentimentSource> = match (&run.sentiment_file, &run.sentiment_url) {
        (Some(path), _) => Box::new(JsonFileSource::new(path)),
        (None, Some(url)) => Box::new(HttpSentimentSource::new(url.as_str())?),
        (None, None) => bail!("no sentiment input: pass --sentiment-file or --sentiment-url"),
    };

    let ledger = TradeLedger::load(Box::new(db.clone())).await?;
    info!(records = ledger.len(), open_buys = ledger.open_buys().len(), "Trade ledger loaded");

    let coinbase = Arc::new(CoinbaseClient::from_env()?);
    let prices: Arc<dyn PriceSource> = coinbase.clone();

    let exchange: Arc<dyn ExchangeGateway> = if run.dry_run {
        let symbols: BTreeSet<&str> = ledger.all().iter().map(|r| r.symbol.as_str()).collect();
        let holdings: HashMap<String, Decimal> = symbols
            .into_iter()
            .map(|s| (s.to_string(), ledger.net_holdings(s)))
            .filter(|(_, qty)| *qty > Decimal::ZERO)
            .collect();
        info!(symbols = holdings.len(), "Dry run: orders fill on the paper exchange");
        Arc::new(PaperExchange::with_holdings(prices.clone(), holdings))
    } else {
        if !coinbase.has_credentials() {
            bail!("COINBASE_API_KEY and COINBASE_API_SECRET are required unless --dry-run is set");
        }
        coinbase
    };

    let notifier: Arc<dyn Notifier> = Arc::from(notify::from_env()?);

    Ok(TradingCycle::new(config.clone(), sentiment, exchange, prices, notifier, ledger).with_journal(db))
}

fn join_symbols(symbols: &[String]) -> String {
    if symbols.is_empty() {
        "-".to_string()
    } else {
        symbols.join(", ")
    }
}
