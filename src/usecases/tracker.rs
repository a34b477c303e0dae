//! Tracker - Runtime Context and Configuration Commands
//!
//! Owns the price cache, one `FeedHandle` per source, the derived
//! registry, the alert engine and the optional change recorder. All
//! configuration commands go through here so registration can check
//! names against the live namespace:
//!
//! - subscribed keys: `<source>_<instrument>` for every requested instrument
//! - derived keys: `calculated_<name>`
//!
//! Commands are synchronous from the caller's view: they either apply
//! fully or fail with a `TrackerError`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::AppConfig;
use crate::domain::{
  canonicalize, price_key, AlertView, DerivedView, EnableOptions, TrackerError, CALCULATED_SOURCE,
};
use crate::ports::{Clock, FeedHandle, Notifier, PriceHistory};

use super::alert_engine::{AlertEngine, NewAlert};
use super::derived_registry::DerivedRegistry;
use super::price_cache::{PriceCache, PriceView};
use super::recorder::ChangeRecorder;

/// Collaborators injected into a `Tracker`.
pub struct TrackerParts {
  pub cache: Arc<PriceCache>,
  pub clock: Arc<dyn Clock>,
  pub notifier: Arc<dyn Notifier>,
  /// Destination passed to the notifier (e.g. a Telegram chat id).
  pub destination: String,
  /// Change-only history sink; `None` disables recording.
  pub history: Option<Arc<dyn PriceHistory>>,
  pub metrics: Arc<MetricsRegistry>,
  /// Period of the derived, alert and recorder loops.
  pub tick_interval: Duration,
}

/// Runtime context exposing every configuration command and query.
pub struct Tracker {
  cache: Arc<PriceCache>,
  /// Canonical source name -> handle.
  feeds: BTreeMap<String, FeedHandle>,
  derived: Arc<DerivedRegistry>,
  alerts: Arc<AlertEngine>,
  recorder: Option<Arc<ChangeRecorder>>,
  tick_interval: Duration,
  shutdown_tx: broadcast::Sender<()>,
  /// Every task started by or attached to this tracker.
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Tracker {
  pub fn new(parts: TrackerParts) -> Self {
    let TrackerParts {
      cache,
      clock,
      notifier,
      destination,
      history,
      metrics,
      tick_interval,
    } = parts;

    let derived = Arc::new(DerivedRegistry::new(
      Arc::clone(&cache),
      Arc::clone(&clock),
      Arc::clone(&metrics),
    ));
    let alerts = Arc::new(AlertEngine::new(
      Arc::clone(&cache),
      clock,
      notifier,
      destination,
      metrics,
    ));
    let recorder = history.map(|history| Arc::new(ChangeRecorder::new(Arc::clone(&cache), history)));
    let (shutdown_tx, _) = broadcast::channel(4);

    Self {
      cache,
      feeds: BTreeMap::new(),
      derived,
      alerts,
      recorder,
      tick_interval,
      shutdown_tx,
      tasks: Mutex::new(Vec::new()),
    }
  }

  /// Register the control handle of a running feed.
  pub fn add_feed(&mut self, handle: FeedHandle) {
    info!(source = handle.source(), "Feed registered");
    self.feeds.insert(canonicalize(handle.source()), handle);
  }

  /// A receiver for the tracker-wide shutdown signal.
  pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
    self.shutdown_tx.subscribe()
  }

  /// Have `shutdown` wait for an externally spawned task.
  pub async fn attach(&self, task: JoinHandle<()>) {
    self.tasks.lock().await.push(task);
  }

  pub fn cache(&self) -> &Arc<PriceCache> {
    &self.cache
  }

  pub fn feeds(&self) -> impl Iterator<Item = &FeedHandle> {
    self.feeds.values()
  }

  /// Register the subscriptions, derived instruments and alerts of the
  /// startup configuration, in that order. Any failure is fatal.
  pub async fn apply_config(&self, config: &AppConfig) -> Result<()> {
    for sub in &config.subscriptions {
      self
        .add_subscription(&sub.source, &sub.instrument)
        .await
        .with_context(|| format!("subscription {}/{}", sub.source, sub.instrument))?;
    }
    for derived in &config.derived {
      self
        .add_derived(&derived.name, &derived.formula)
        .await
        .with_context(|| format!("derived instrument {}", derived.name))?;
    }
    for alert in &config.alerts {
      let new_alert = NewAlert {
        instrument: alert.instrument.clone(),
        condition: alert.condition.clone(),
        message: alert.message.clone(),
        min_interval_secs: alert.min_interval_secs,
        max_activations: alert.max_activations,
      };
      self
        .add_alert(new_alert)
        .await
        .with_context(|| format!("alert {} `{}`", alert.instrument, alert.condition))?;
    }
    info!(
      subscriptions = config.subscriptions.len(),
      derived = config.derived.len(),
      alerts = config.alerts.len(),
      "Startup configuration applied"
    );
    Ok(())
  }

  /// Start the derived registry, alert engine and recorder loops.
  pub async fn start(&self) {
    let mut tasks = self.tasks.lock().await;

    let derived = Arc::clone(&self.derived);
    tasks.push(tokio::spawn(derived.run(self.tick_interval, self.shutdown_signal())));

    let alerts = Arc::clone(&self.alerts);
    tasks.push(tokio::spawn(alerts.run(self.tick_interval, self.shutdown_signal())));

    if let Some(recorder) = &self.recorder {
      let recorder = Arc::clone(recorder);
      tasks.push(tokio::spawn(recorder.run(self.tick_interval, self.shutdown_signal())));
    }

    info!(tasks = tasks.len(), "Tracker started");
  }

  /// Signal every task to stop and wait for them.
  pub async fn shutdown(&self) {
    let _ = self.shutdown_tx.send(());
    let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
    for task in tasks {
      if let Err(e) = task.await {
        warn!(error = %e, "Task ended abnormally");
      }
    }
    info!("Tracker stopped");
  }

  /// One synchronous pass of every periodic engine, in order: derived
  /// instruments, alerts, recorder.
  pub async fn tick(&self) {
    self.derived.tick().await;
    self.alerts.tick().await;
    if let Some(recorder) = &self.recorder {
      recorder.tick().await;
    }
  }

  fn feed(&self, source: &str) -> Result<&FeedHandle, TrackerError> {
    self
      .feeds
      .get(&canonicalize(source.trim()))
      .ok_or_else(|| TrackerError::UnknownSource(source.to_string()))
  }

  /// Every name a formula or condition may reference.
  async fn known_names(&self) -> HashSet<String> {
    let mut names = HashSet::new();
    for handle in self.feeds.values() {
      for instrument in handle.instruments().await {
        names.insert(price_key(handle.source(), &instrument));
      }
    }
    names.extend(self.derived.keys().await);
    names
  }

  // -- subscriptions ---------------------------------------------------

  /// Subscribe `instrument` on `source`. Returns `false` if it already was.
  pub async fn add_subscription(&self, source: &str, instrument: &str) -> Result<bool, TrackerError> {
    let handle = self.feed(source)?;
    let instrument = instrument.trim();
    if instrument.is_empty() {
      return Err(TrackerError::MissingField("ticker"));
    }
    Ok(handle.subscribe(instrument).await)
  }

  /// Unsubscribe and evict the cached price.
  pub async fn remove_subscription(&self, source: &str, instrument: &str) -> Result<(), TrackerError> {
    let handle = self.feed(source)?;
    let removed = handle
      .unsubscribe(instrument.trim())
      .await
      .ok_or_else(|| TrackerError::UnknownInstrument {
        exchange: source.to_string(),
        instrument: instrument.to_string(),
      })?;
    self.cache.remove(&price_key(handle.source(), &removed));
    Ok(())
  }

  // -- derived instruments ----------------------------------------------

  pub async fn add_derived(&self, name: &str, formula: &str) -> Result<DerivedView, TrackerError> {
    let known = self.known_names().await;
    self
      .derived
      .add(name, formula, |candidate| known.contains(candidate))
      .await
  }

  pub async fn remove_derived(&self, name: &str) -> Result<DerivedView, TrackerError> {
    self.derived.remove(name).await
  }

  // -- alerts -------------------------------------------------------------

  pub async fn add_alert(&self, alert: NewAlert) -> Result<AlertView, TrackerError> {
    let known = self.known_names().await;
    self
      .alerts
      .add(alert, |candidate| known.contains(candidate))
      .await
  }

  pub async fn remove_alert(&self, instrument: &str, condition: &str) -> Result<AlertView, TrackerError> {
    self.alerts.remove(instrument, condition).await
  }

  pub async fn enable_alert(
    &self,
    instrument: &str,
    condition: &str,
    options: EnableOptions,
  ) -> Result<AlertView, TrackerError> {
    self.alerts.enable(instrument, condition, options).await
  }

  pub async fn disable_alert(&self, instrument: &str, condition: &str) -> Result<AlertView, TrackerError> {
    self.alerts.disable(instrument, condition).await
  }

  // -- queries ------------------------------------------------------------

  pub fn current_prices(&self, include_timestamps: bool) -> BTreeMap<String, PriceView> {
    self.cache.current_prices(include_timestamps)
  }

  /// Subscribed instruments per source, plus derived names under
  /// `Calculated`.
  pub async fn instruments(&self) -> BTreeMap<String, Vec<String>> {
    let mut listing = BTreeMap::new();
    for handle in self.feeds.values() {
      listing.insert(handle.source().to_string(), handle.instruments().await);
    }
    listing.insert(CALCULATED_SOURCE.to_string(), self.derived.names().await);
    listing
  }

  pub async fn derived_formulas(&self) -> Vec<DerivedView> {
    self.derived.list().await
  }

  pub async fn alerts(&self) -> Vec<AlertView> {
    self.alerts.list().await
  }
}
