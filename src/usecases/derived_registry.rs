//! Derived Instrument Registry - Periodic Formula Recomputation
//!
//! Every tick takes one cache snapshot, evaluates each registered formula
//! against it and publishes values that changed back into the cache under
//! `calculated_<name>`. A failed evaluation keeps the previous value.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::{
  canonicalize, derived_key, DerivedInstrument, DerivedView, Expression, PriceSample,
  TrackerError, CALCULATED_SOURCE,
};
use crate::ports::Clock;

use super::price_cache::PriceCache;

/// Registry of derived instruments keyed by canonical name.
pub struct DerivedRegistry {
  /// Canonical name -> instrument.
  instruments: RwLock<BTreeMap<String, DerivedInstrument>>,
  /// Shared price cache (read for evaluation, written on change).
  cache: Arc<PriceCache>,
  /// Time source for published timestamps.
  clock: Arc<dyn Clock>,
  metrics: Arc<MetricsRegistry>,
}

impl DerivedRegistry {
  pub fn new(cache: Arc<PriceCache>, clock: Arc<dyn Clock>, metrics: Arc<MetricsRegistry>) -> Self {
    Self {
      instruments: RwLock::new(BTreeMap::new()),
      cache,
      clock,
      metrics,
    }
  }

  /// Register a derived instrument.
  ///
  /// The formula may only reference names accepted by `is_known`. Nothing
  /// is registered unless validation succeeds.
  pub async fn add<F>(
    &self,
    name: &str,
    formula: &str,
    is_known: F,
  ) -> Result<DerivedView, TrackerError>
  where
    F: Fn(&str) -> bool,
  {
    let name = name.trim();
    if name.is_empty() {
      return Err(TrackerError::MissingField("name"));
    }
    if formula.trim().is_empty() {
      return Err(TrackerError::MissingField("formula"));
    }

    let canonical = canonicalize(name);
    let mut instruments = self.instruments.write().await;
    if instruments.contains_key(&canonical) {
      return Err(TrackerError::DuplicateDerived(name.to_string()));
    }

    let expression =
      Expression::formula(formula, is_known).map_err(|error| TrackerError::InvalidFormula {
        name: name.to_string(),
        error,
      })?;

    let derived = DerivedInstrument::new(name, expression);
    let view = derived.view();
    instruments.insert(canonical, derived);
    info!(name, formula = %view.formula, "Derived instrument registered");
    Ok(view)
  }

  /// Unregister a derived instrument and evict its published price.
  pub async fn remove(&self, name: &str) -> Result<DerivedView, TrackerError> {
    let removed = self
      .instruments
      .write()
      .await
      .remove(&canonicalize(name))
      .ok_or_else(|| TrackerError::UnknownDerived(name.to_string()))?;
    self.cache.remove(&removed.key());
    info!(name = %removed.name, "Derived instrument removed");
    Ok(removed.view())
  }

  pub async fn list(&self) -> Vec<DerivedView> {
    self
      .instruments
      .read()
      .await
      .values()
      .map(DerivedInstrument::view)
      .collect()
  }

  /// Registered names as originally spelled.
  pub async fn names(&self) -> Vec<String> {
    self
      .instruments
      .read()
      .await
      .values()
      .map(|derived| derived.name.clone())
      .collect()
  }

  /// Cache keys the registered instruments publish under.
  pub async fn keys(&self) -> Vec<String> {
    self
      .instruments
      .read()
      .await
      .keys()
      .map(|canonical| derived_key(canonical))
      .collect()
  }

  /// Recompute every formula against one snapshot. Returns the names whose
  /// published value changed.
  pub async fn tick(&self) -> Vec<String> {
    let snapshot = self.cache.snapshot();
    let now = self.clock.now();
    let mut changed = Vec::new();

    let mut instruments = self.instruments.write().await;
    for derived in instruments.values_mut() {
      let value = match derived.formula.evaluate(&snapshot) {
        Ok(value) => value,
        Err(e) => {
          warn!(name = %derived.name, error = %e, "Derived instrument evaluation failed");
          self
            .metrics
            .derived_evaluation_errors
            .with_label_values(&[derived.name.as_str()])
            .inc();
          continue;
        }
      };
      // Formulas are type-checked as numeric at registration.
      let Some(price) = value.as_f64() else {
        continue;
      };
      if derived.update(price, now) {
        self
          .cache
          .put(PriceSample::new(CALCULATED_SOURCE, derived.name.clone(), now, price));
        debug!(name = %derived.name, price, "Derived instrument updated");
        changed.push(derived.name.clone());
      }
    }

    changed
  }

  /// Run `tick` on a fixed interval until shutdown.
  #[instrument(skip(self, shutdown_rx))]
  pub async fn run(self: Arc<Self>, period: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Derived registry shutting down");
          return;
        }
        _ = interval.tick() => {
          self.tick().await;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ports::ManualClock;

  fn registry() -> (DerivedRegistry, Arc<PriceCache>, Arc<ManualClock>) {
    let cache = Arc::new(PriceCache::new());
    let clock = Arc::new(ManualClock::new(0));
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let registry = DerivedRegistry::new(Arc::clone(&cache), clock.clone(), metrics);
    (registry, cache, clock)
  }

  fn known(name: &str) -> bool {
    matches!(name, "kucoin_btc_usdt" | "mexc_btcusdt")
  }

  #[tokio::test]
  async fn test_add_rejects_unknown_names_and_duplicates() {
    let (registry, _, _) = registry();

    let err = registry.add("bad", "kucoin_eth_usdt * 2", known).await.unwrap_err();
    assert!(matches!(err, TrackerError::InvalidFormula { .. }));
    assert!(registry.list().await.is_empty());

    registry
      .add("BTC_RATIO", "mexc_BTCUSDT / kucoin_BTC-USDT", known)
      .await
      .unwrap();
    let err = registry.add("btc.ratio", "mexc_btcusdt", known).await.unwrap_err();
    assert!(matches!(err, TrackerError::DuplicateDerived(_)));
  }

  #[tokio::test]
  async fn test_add_rejects_boolean_formula() {
    let (registry, _, _) = registry();
    let err = registry.add("flag", "mexc_btcusdt > 1", known).await.unwrap_err();
    assert!(matches!(err, TrackerError::InvalidFormula { .. }));
  }

  #[tokio::test]
  async fn test_tick_publishes_only_on_change() {
    let (registry, cache, clock) = registry();
    registry.add("double", "mexc_btcusdt * 2", known).await.unwrap();

    // No input yet: evaluation fails, nothing published.
    assert!(registry.tick().await.is_empty());
    assert!(cache.get("calculated_double").is_none());

    cache.put(PriceSample::new("mexc", "BTCUSDT", 0, 10.0));
    clock.set(1);
    assert_eq!(registry.tick().await, vec!["double".to_string()]);
    let sample = cache.get("calculated_double").unwrap();
    assert!((sample.price - 20.0).abs() < f64::EPSILON);
    assert_eq!(sample.timestamp, 1);

    clock.set(2);
    assert!(registry.tick().await.is_empty());
    assert_eq!(cache.get("calculated_double").unwrap().timestamp, 1);
  }

  #[tokio::test]
  async fn test_failed_evaluation_keeps_previous_value() {
    let (registry, cache, clock) = registry();
    registry
      .add("ratio", "mexc_btcusdt / kucoin_btc_usdt", known)
      .await
      .unwrap();

    cache.put(PriceSample::new("mexc", "BTCUSDT", 0, 10.0));
    cache.put(PriceSample::new("kucoin", "BTC-USDT", 0, 5.0));
    registry.tick().await;

    cache.put(PriceSample::new("kucoin", "BTC-USDT", 1, 0.0));
    clock.set(1);
    assert!(registry.tick().await.is_empty());

    let view = &registry.list().await[0];
    assert_eq!(view.price, Some(2.0));
    assert_eq!(view.timestamp, Some(0));
  }

  #[tokio::test]
  async fn test_remove_evicts_published_price() {
    let (registry, cache, _) = registry();
    registry.add("copy", "mexc_btcusdt", known).await.unwrap();
    cache.put(PriceSample::new("mexc", "BTCUSDT", 0, 3.0));
    registry.tick().await;
    assert!(cache.get("calculated_copy").is_some());

    registry.remove("COPY").await.unwrap();
    assert!(cache.get("calculated_copy").is_none());
    assert!(matches!(
      registry.remove("copy").await,
      Err(TrackerError::UnknownDerived(_))
    ));
  }
}
