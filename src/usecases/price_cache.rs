//! Price Cache - Latest Sample per Instrument
//!
//! Concurrent mapping from canonical key to the most recent
//! `PriceSample`. Feed supervisors write their own keys, the derived
//! registry writes `calculated_*` keys, and every periodic engine reads
//! through an immutable `Snapshot` taken once per tick.
//!
//! Writes are last-write-wins: a sample with an older timestamp still
//! replaces a newer one.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use crate::domain::{PriceSample, Variables};

/// Shared latest-price store.
#[derive(Debug, Default)]
pub struct PriceCache {
  /// Canonical key -> latest sample.
  entries: DashMap<String, PriceSample>,
}

impl PriceCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Overwrite the entry for the sample's key.
  pub fn put(&self, sample: PriceSample) {
    self.entries.insert(sample.key(), sample);
  }

  /// Evict a key. Returns the evicted sample, if any.
  pub fn remove(&self, key: &str) -> Option<PriceSample> {
    self.entries.remove(key).map(|(_, sample)| sample)
  }

  pub fn get(&self, key: &str) -> Option<PriceSample> {
    self.entries.get(key).map(|entry| entry.value().clone())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Copy of every entry at this instant.
  ///
  /// Each entry is copied atomically; a concurrent writer can land before
  /// or after its key is visited but never produces a torn sample.
  pub fn snapshot(&self) -> Snapshot {
    let entries = self
      .entries
      .iter()
      .map(|entry| (entry.key().clone(), entry.value().clone()))
      .collect();
    Snapshot { entries }
  }

  /// Query view of all current prices keyed by canonical key.
  pub fn current_prices(&self, include_timestamps: bool) -> BTreeMap<String, PriceView> {
    self.snapshot().prices(include_timestamps)
  }
}

/// Immutable point-in-time view of the cache.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  entries: BTreeMap<String, PriceSample>,
}

impl Snapshot {
  pub fn get(&self, key: &str) -> Option<&PriceSample> {
    self.entries.get(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &PriceSample)> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn prices(&self, include_timestamps: bool) -> BTreeMap<String, PriceView> {
    self
      .entries
      .iter()
      .map(|(key, sample)| {
        let view = if include_timestamps {
          PriceView::Detailed {
            price: sample.price,
            timestamp: sample.timestamp,
          }
        } else {
          PriceView::Price(sample.price)
        };
        (key.clone(), view)
      })
      .collect()
  }
}

impl Variables for Snapshot {
  fn lookup(&self, name: &str) -> Option<f64> {
    self.entries.get(name).map(|sample| sample.price)
  }
}

/// One entry of the current-prices query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PriceView {
  Price(f64),
  Detailed { price: f64, timestamp: i64 },
}
