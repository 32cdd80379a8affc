//! Sentiment input: where the per-entity score table comes from.
//!
//! The scoring itself happens elsewhere; this module only reads its output
//! and validates each row before ranking.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::models::{RawSentimentRecord, SentimentRecord, SentimentRejection};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Producer of one sentiment table per cycle.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawSentimentRecord>>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Accepts either a bare array or `{"records": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum TableDocument {
    Rows(Vec<RawSentimentRecord>),
    Wrapped { records: Vec<RawSentimentRecord> },
}

impl TableDocument {
    fn into_rows(self) -> Vec<RawSentimentRecord> {
        match self {
            TableDocument::Rows(rows) => rows,
            TableDocument::Wrapped { records } => records,
        }
    }
}

fn parse_table(body: &str) -> Result<Vec<RawSentimentRecord>> {
    let doc: TableDocument = serde_json::from_str(body).context("Failed to parse sentiment table")?;
    Ok(doc.into_rows())
}

/// JSON file written by the scoring job.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SentimentSource for JsonFileSource {
    async fn fetch(&self) -> Result<Vec<RawSentimentRecord>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read sentiment file {}", self.path.display()))?;
        parse_table(&body)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// HTTP endpoint serving the same JSON document.
pub struct HttpSentimentSource {
    client: Client,
    url: String,
}

impl HttpSentimentSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl SentimentSource for HttpSentimentSource {
    async fn fetch(&self) -> Result<Vec<RawSentimentRecord>> {
        debug!(url = %self.url, "Fetching sentiment table");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch sentiment table")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Sentiment request failed: {} - {}", status, body);
        }

        let body = response.text().await.context("Failed to read sentiment response")?;
        parse_table(&body)
    }

    fn describe(&self) -> String {
        format!("url {}", self.url)
    }
}

/// Rows that passed validation, plus the ones that did not.
#[derive(Debug, Default)]
pub struct SentimentTable {
    pub records: Vec<SentimentRecord>,
    pub rejected: Vec<(String, SentimentRejection)>,
}

impl SentimentTable {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Validate every row; invalid rows are logged and left out.
pub fn validate_rows(rows: Vec<RawSentimentRecord>) -> SentimentTable {
    let mut table = SentimentTable::default();

    for row in rows {
        let label = if row.symbol.trim().is_empty() {
            row.entity.clone()
        } else {
            row.symbol.clone()
        };
        match row.validate() {
            Ok(record) => table.records.push(record),
            Err(reason) => {
                warn!(entity = %label, reason = %reason, "Excluding sentiment row from ranking");
                table.rejected.push((label, reason));
            }
        }
    }

    info!(
        accepted = table.records.len(),
        rejected = table.rejected.len(),
        "Sentiment table validated"
    );
    table
}
