//! Price Log - Append-only JSONL Price History
//!
//! Persists price changes to daily JSONL files in the format
//! `prices/YYYY-MM-DD.jsonl`, partitioned by the change timestamp.
//! Each line is a self-contained `PriceChange` record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::price_key;
use crate::ports::{PriceChange, PriceHistory};

/// Append-only JSONL price history with daily file rotation.
pub struct JsonlPriceLog {
    /// Directory holding the daily files.
    prices_dir: PathBuf,
    /// Serializes appends so lines from concurrent writers never interleave.
    write_lock: Mutex<()>,
}

impl JsonlPriceLog {
    /// Create a price log in the given data directory.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let prices_dir = Path::new(data_dir).join("prices");

        fs::create_dir_all(&prices_dir)
            .await
            .context("Failed to create prices directory")?;

        info!(dir = %prices_dir.display(), "Price log ready");
        Ok(Self {
            prices_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn day_of(timestamp: i64) -> NaiveDate {
        DateTime::from_timestamp(timestamp, 0)
            .unwrap_or_default()
            .date_naive()
    }

    fn file_for(&self, day: NaiveDate) -> PathBuf {
        self.prices_dir
            .join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Read every record of one day file. A missing file is an empty day.
    async fn read_day(&self, day: NaiveDate) -> Result<Vec<PriceChange>> {
        let path = self.file_for(day);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PriceChange>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        error = %e,
                        "Skipping malformed price record"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Check if the prices directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let test_path = self.prices_dir.join(".health_check");
        let result = fs::write(&test_path, b"ok").await;
        let _ = fs::remove_file(&test_path).await;
        result.is_ok()
    }
}

#[async_trait]
impl PriceHistory for JsonlPriceLog {
    #[instrument(skip(self, change), fields(source = %change.source, instrument = %change.instrument))]
    async fn record(&self, change: &PriceChange) -> Result<()> {
        let path = self.file_for(Self::day_of(change.timestamp));

        let mut json =
            serde_json::to_string(change).context("Failed to serialize price change")?;
        json.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open price log file")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write price change")?;
        file.flush().await.context("Failed to flush price log")?;

        Ok(())
    }

    async fn recent(
        &self,
        source: &str,
        instrument: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<PriceChange>> {
        let wanted = price_key(source, instrument);
        let today = Utc::now().date_naive();
        let mut day = Self::day_of(since);
        let mut matches = Vec::new();

        while day <= today {
            for record in self.read_day(day).await? {
                if record.timestamp >= since
                    && price_key(&record.source, &record.instrument) == wanted
                {
                    matches.push(record);
                }
            }
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }

        matches.sort_by_key(|record| record.timestamp);
        let skip = matches.len().saturating_sub(limit);
        Ok(matches.split_off(skip))
    }
}
