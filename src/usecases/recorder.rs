//! Change Recorder - Change-Only Price History
//!
//! Once per tick compares every cached price with the value last handed
//! to the `PriceHistory` port and records only the keys that moved.
//! A failed write is retried on the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::ports::{PriceChange, PriceHistory};

use super::price_cache::PriceCache;

pub struct ChangeRecorder {
  cache: Arc<PriceCache>,
  history: Arc<dyn PriceHistory>,
  /// Canonical key -> last recorded price.
  last_recorded: Mutex<HashMap<String, f64>>,
}

impl ChangeRecorder {
  pub fn new(cache: Arc<PriceCache>, history: Arc<dyn PriceHistory>) -> Self {
    Self {
      cache,
      history,
      last_recorded: Mutex::new(HashMap::new()),
    }
  }

  /// Record every changed key once. Returns the number of records written.
  #[allow(clippy::float_cmp)]
  pub async fn tick(&self) -> usize {
    let snapshot = self.cache.snapshot();
    let mut last_recorded = self.last_recorded.lock().await;

    // Evicted keys start over if they come back.
    last_recorded.retain(|key, _| snapshot.contains(key));

    let mut written = 0;
    for (key, sample) in snapshot.iter() {
      if last_recorded.get(key) == Some(&sample.price) {
        continue;
      }
      let change = PriceChange {
        source: sample.source.clone(),
        instrument: sample.instrument.clone(),
        timestamp: sample.timestamp,
        price: sample.price,
      };
      match self.history.record(&change).await {
        Ok(()) => {
          debug!(source = %change.source, instrument = %change.instrument, price = change.price, "Price change recorded");
          last_recorded.insert(key.clone(), sample.price);
          written += 1;
        }
        Err(e) => {
          warn!(key = %key, error = %e, "Failed to record price change");
        }
      }
    }

    written
  }

  #[instrument(skip(self, shutdown_rx))]
  pub async fn run(self: Arc<Self>, period: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Change recorder shutting down");
          return;
        }
        _ = interval.tick() => {
          self.tick().await;
        }
      }
    }
  }
}
