//! Alert Engine - Threshold Rules and Notification Dispatch
//!
//! Evaluates every enabled rule against one cache snapshot per tick.
//! Trigger bookkeeping (count, last trigger time, auto-disable at the cap)
//! happens under the rules write lock; notifications are dispatched after
//! the lock is released and a delivery failure never rolls bookkeeping back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::{
  canonicalize, AlertRule, AlertView, EnableOptions, Expression, TrackerError, Value, Variables,
};
use crate::ports::{Clock, Notifier};

use super::price_cache::{PriceCache, Snapshot};

/// Variable bound to the watched instrument's price in a condition.
pub const PRICE_VARIABLE: &str = "price";
/// Variable bound to the watched instrument's sample timestamp.
pub const TIMESTAMP_VARIABLE: &str = "timestamp";

/// Request to register a new alert rule.
#[derive(Debug, Clone, Default)]
pub struct NewAlert {
  /// Instrument key, e.g. `mexc_BTCUSDT` or `Calculated_BTC_RATIO`.
  pub instrument: String,
  /// Boolean condition, e.g. `price > 50000`.
  pub condition: String,
  /// Message template.
  pub message: String,
  /// Minimum seconds between activations.
  pub min_interval_secs: u64,
  /// Activation cap (`None` = unlimited).
  pub max_activations: Option<u32>,
}

/// Condition namespace: `price` and `timestamp` of the watched key, then
/// every snapshot key.
struct Bindings<'a> {
  price: f64,
  timestamp: i64,
  snapshot: &'a Snapshot,
}

impl Variables for Bindings<'_> {
  #[allow(clippy::cast_precision_loss)]
  fn lookup(&self, name: &str) -> Option<f64> {
    match name {
      PRICE_VARIABLE => Some(self.price),
      TIMESTAMP_VARIABLE => Some(self.timestamp as f64),
      other => self.snapshot.lookup(other),
    }
  }
}

/// A rendered notification waiting for dispatch.
#[derive(Debug)]
struct Activation {
  key: String,
  message: String,
}

/// Rule store plus the periodic evaluation loop.
pub struct AlertEngine {
  /// Registered rules in insertion order.
  rules: RwLock<Vec<AlertRule>>,
  cache: Arc<PriceCache>,
  clock: Arc<dyn Clock>,
  /// Delivery port.
  notifier: Arc<dyn Notifier>,
  /// Destination handed to the notifier (e.g. a chat id).
  destination: String,
  metrics: Arc<MetricsRegistry>,
}

impl AlertEngine {
  pub fn new(
    cache: Arc<PriceCache>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    destination: impl Into<String>,
    metrics: Arc<MetricsRegistry>,
  ) -> Self {
    Self {
      rules: RwLock::new(Vec::new()),
      cache,
      clock,
      notifier,
      destination: destination.into(),
      metrics,
    }
  }

  /// Register a rule.
  ///
  /// `is_known` decides which instrument keys exist; the condition may
  /// additionally reference `price` and `timestamp`.
  pub async fn add<F>(&self, alert: NewAlert, is_known: F) -> Result<AlertView, TrackerError>
  where
    F: Fn(&str) -> bool,
  {
    if alert.instrument.trim().is_empty() {
      return Err(TrackerError::MissingField("ticker"));
    }
    if alert.condition.trim().is_empty() {
      return Err(TrackerError::MissingField("condition"));
    }
    if alert.message.trim().is_empty() {
      return Err(TrackerError::MissingField("message"));
    }

    let key = canonicalize(alert.instrument.trim());
    if !is_known(&key) {
      return Err(TrackerError::UnknownKey(alert.instrument));
    }

    let condition = Expression::condition(&alert.condition, |name| {
      name == PRICE_VARIABLE || name == TIMESTAMP_VARIABLE || is_known(name)
    })
    .map_err(|error| TrackerError::InvalidCondition {
      key: key.clone(),
      error,
    })?;

    let mut rules = self.rules.write().await;
    if rules.iter().any(|rule| rule.matches(&key, condition.as_str())) {
      return Err(TrackerError::DuplicateAlert {
        key,
        condition: condition.as_str().to_string(),
      });
    }

    let rule = AlertRule::new(
      &key,
      condition,
      alert.message,
      alert.min_interval_secs,
      alert.max_activations,
    );
    let view = rule.view();
    rules.push(rule);
    info!(key = %view.ticker, condition = %view.condition, "Alert registered");
    Ok(view)
  }

  pub async fn remove(&self, instrument: &str, condition: &str) -> Result<AlertView, TrackerError> {
    let mut rules = self.rules.write().await;
    let index = Self::position(&rules, instrument, condition)?;
    let removed = rules.remove(index);
    info!(key = %removed.key, condition = %removed.condition, "Alert removed");
    Ok(removed.view())
  }

  /// Re-enable a rule, optionally resetting its counter and replacing its
  /// cap. All changes land in one critical section.
  pub async fn enable(
    &self,
    instrument: &str,
    condition: &str,
    options: EnableOptions,
  ) -> Result<AlertView, TrackerError> {
    let mut rules = self.rules.write().await;
    let index = Self::position(&rules, instrument, condition)?;
    let rule = &mut rules[index];
    rule.enable(options);
    info!(
      key = %rule.key,
      condition = %rule.condition,
      reset = options.reset,
      max_activations = ?rule.max_activations,
      "Alert enabled"
    );
    Ok(rule.view())
  }

  pub async fn disable(&self, instrument: &str, condition: &str) -> Result<AlertView, TrackerError> {
    let mut rules = self.rules.write().await;
    let index = Self::position(&rules, instrument, condition)?;
    let rule = &mut rules[index];
    rule.disable();
    info!(key = %rule.key, condition = %rule.condition, "Alert disabled");
    Ok(rule.view())
  }

  /// Full state of every rule.
  pub async fn list(&self) -> Vec<AlertView> {
    self.rules.read().await.iter().map(AlertRule::view).collect()
  }

  fn position(rules: &[AlertRule], instrument: &str, condition: &str) -> Result<usize, TrackerError> {
    rules
      .iter()
      .position(|rule| rule.matches(instrument, condition))
      .ok_or_else(|| TrackerError::AlertNotFound {
        key: canonicalize(instrument.trim()),
        condition: condition.trim().to_string(),
      })
  }

  /// Evaluate every rule once and dispatch the resulting notifications.
  /// Returns the number of activations.
  pub async fn tick(&self) -> usize {
    let snapshot = self.cache.snapshot();
    let now = self.clock.now();
    let activations = self.evaluate(&snapshot, now).await;
    let fired = activations.len();

    for activation in activations {
      self.metrics.alerts_fired.inc();
      if let Err(e) = self
        .notifier
        .send(&self.destination, &activation.message)
        .await
      {
        self.metrics.notification_failures.inc();
        warn!(
          key = %activation.key,
          notifier = self.notifier.name(),
          error = %e,
          "Alert notification failed"
        );
      }
    }

    fired
  }

  /// Bookkeeping half of a tick, run entirely under the write lock.
  async fn evaluate(&self, snapshot: &Snapshot, now: i64) -> Vec<Activation> {
    let mut activations = Vec::new();
    let mut rules = self.rules.write().await;

    for rule in rules.iter_mut() {
      if !rule.enabled {
        continue;
      }
      // Enabled at or over its cap (e.g. cap lowered on enable).
      if !rule.under_cap() {
        rule.disable();
        continue;
      }
      let Some(sample) = snapshot.get(&rule.key) else {
        continue;
      };

      let bindings = Bindings {
        price: sample.price,
        timestamp: sample.timestamp,
        snapshot,
      };
      match rule.condition.evaluate(&bindings) {
        Ok(Value::Bool(true)) => {
          if rule.can_fire(now) {
            rule.record_trigger(now);
            info!(
              key = %rule.key,
              condition = %rule.condition,
              price = sample.price,
              activation_count = rule.activation_count,
              enabled = rule.enabled,
              "Alert triggered"
            );
            activations.push(Activation {
              key: rule.key.clone(),
              message: rule.render(sample.price, sample.timestamp),
            });
          }
        }
        Ok(_) => {}
        Err(e) => {
          debug!(key = %rule.key, condition = %rule.condition, error = %e, "Alert condition not evaluable");
        }
      }
    }

    activations
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
          info!("Alert engine shutting down");
          return;
        }
        _ = interval.tick() => {
          self.tick().await;
        }
      }
    }
  }
}
