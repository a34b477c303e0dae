//! Price History Port - Change-Only Persistence Interface
//!
//! The core calls `record` once per detected price change, never for an
//! unchanged value. Storage format and retention belong to the adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A persisted price change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
  /// Exchange name, or `Calculated` for derived instruments.
  pub source: String,
  /// Instrument symbol or derived instrument name.
  pub instrument: String,
  /// Unix seconds.
  pub timestamp: i64,
  /// New price.
  pub price: f64,
}

/// Persistence collaborator for price history.
#[async_trait]
pub trait PriceHistory: Send + Sync + 'static {
  /// Append one change.
  async fn record(&self, change: &PriceChange) -> anyhow::Result<()>;

  /// Up to `limit` most recent changes for a series at or after `since`,
  /// oldest first.
  async fn recent(
    &self,
    source: &str,
    instrument: &str,
    since: i64,
    limit: usize,
  ) -> anyhow::Result<Vec<PriceChange>>;
}
