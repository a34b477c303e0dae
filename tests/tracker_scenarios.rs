//! Tracker Scenarios - End-to-end Engine Behaviour
//!
//! Drives the tracker tick by tick with a manual clock, writing prices
//! straight into the cache the way a feed supervisor would. Notifications
//! go to a mockall mock so activation counts are verified on drop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use tokio::sync::{mpsc, watch, Mutex};

use price_tracker::adapters::metrics::MetricsRegistry;
use price_tracker::domain::{EnableOptions, NotificationError, PriceSample, TrackerError, ValidationError};
use price_tracker::ports::{
    ConnectionState, FeedCommand, FeedHandle, ManualClock, Notifier, PriceChange, PriceHistory,
};
use price_tracker::usecases::{NewAlert, PriceCache, PriceView, Tracker, TrackerParts};

// ---- Mock Definitions ----

mock! {
    pub Sink {}

    #[async_trait::async_trait]
    impl Notifier for Sink {
        async fn send(&self, destination: &str, message: &str) -> Result<(), NotificationError>;
    }
}

#[derive(Default)]
struct MemoryHistory {
    changes: Mutex<Vec<PriceChange>>,
}

#[async_trait::async_trait]
impl PriceHistory for MemoryHistory {
    async fn record(&self, change: &PriceChange) -> anyhow::Result<()> {
        self.changes.lock().await.push(change.clone());
        Ok(())
    }

    async fn recent(
        &self,
        _source: &str,
        _instrument: &str,
        _since: i64,
        _limit: usize,
    ) -> anyhow::Result<Vec<PriceChange>> {
        Ok(self.changes.lock().await.clone())
    }
}

// ---- Harness ----

struct Harness {
    tracker: Tracker,
    clock: Arc<ManualClock>,
    cache: Arc<PriceCache>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    _state: watch::Sender<ConnectionState>,
}

impl Harness {
    fn new(notifier: Arc<dyn Notifier>, history: Option<Arc<dyn PriceHistory>>) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(PriceCache::new());
        let mut tracker = Tracker::new(TrackerParts {
            cache: Arc::clone(&cache),
            clock: clock.clone(),
            notifier,
            destination: "chat".to_string(),
            history,
            metrics: Arc::new(MetricsRegistry::new().unwrap()),
            tick_interval: Duration::from_secs(1),
        });

        let (tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        tracker.add_feed(FeedHandle::new("mexc", tx, state_rx));

        Self {
            tracker,
            clock,
            cache,
            commands,
            _state: state_tx,
        }
    }

    /// Publish a quote the way the `mexc` supervisor would.
    fn quote(&self, instrument: &str, price: f64) {
        self.cache
            .put(PriceSample::new("mexc", instrument, self.clock_now(), price));
    }

    fn clock_now(&self) -> i64 {
        use price_tracker::ports::Clock;
        self.clock.now()
    }

    async fn tick_at(&self, t: i64) {
        self.clock.set(t);
        self.tracker.tick().await;
    }
}

fn silent_notifier() -> Arc<dyn Notifier> {
    let mut sink = MockSink::new();
    sink.expect_send().never();
    Arc::new(sink)
}

fn price_of(view: Option<&PriceView>) -> Option<f64> {
    match view? {
        PriceView::Price(price) => Some(*price),
        PriceView::Detailed { price, .. } => Some(*price),
    }
}

// ---- Scenarios ----

#[tokio::test]
async fn test_derived_follows_latest_quote() {
    let h = Harness::new(silent_notifier(), None);
    assert!(h.tracker.add_subscription("mexc", "X").await.unwrap());
    h.tracker.add_derived("Y", "mexc_X / 2").await.unwrap();

    h.clock.set(0);
    h.quote("X", 100.0);
    h.clock.set(1);
    h.quote("X", 101.0);
    assert_eq!(h.cache.snapshot().get("mexc_x").map(|s| s.price), Some(101.0));

    h.tick_at(1).await;
    let prices = h.tracker.current_prices(false);
    assert_eq!(price_of(prices.get("calculated_y")), Some(50.5));

    let formulas = h.tracker.derived_formulas().await;
    assert_eq!(formulas.len(), 1);
    assert_eq!(formulas[0].price, Some(50.5));
    assert_eq!(formulas[0].timestamp, Some(1));
}

#[tokio::test]
async fn test_alert_respects_interval_and_cap() {
    let mut sink = MockSink::new();
    sink.expect_send()
        .withf(|destination, message| destination == "chat" && message.starts_with("calculated_y above 50"))
        .times(2)
        .returning(|_, _| Ok(()));

    let h = Harness::new(Arc::new(sink), None);
    h.tracker.add_subscription("mexc", "X").await.unwrap();
    h.tracker.add_derived("Y", "mexc_X / 2").await.unwrap();

    h.clock.set(1);
    h.quote("X", 101.0);
    h.tick_at(1).await;

    h.tracker
        .add_alert(NewAlert {
            instrument: "Calculated_Y".into(),
            condition: "price > 50".into(),
            message: "{ticker} above 50: {price:.2}".into(),
            min_interval_secs: 10,
            max_activations: Some(2),
        })
        .await
        .unwrap();

    h.tick_at(2).await;
    let alert = &h.tracker.alerts().await[0];
    assert_eq!(alert.activation_count, 1);
    assert_eq!(alert.last_triggered, Some(2));

    h.tick_at(5).await;
    assert_eq!(h.tracker.alerts().await[0].activation_count, 1);

    h.tick_at(12).await;
    let alert = &h.tracker.alerts().await[0];
    assert_eq!(alert.activation_count, 2);
    assert!(!alert.enabled);

    h.tick_at(20).await;
    let alert = &h.tracker.alerts().await[0];
    assert_eq!(alert.activation_count, 2);
    assert_eq!(alert.last_triggered, Some(12));
}

#[tokio::test]
async fn test_unknown_formula_reference_rejected_at_registration() {
    let h = Harness::new(silent_notifier(), None);
    h.tracker.add_subscription("mexc", "X").await.unwrap();

    let err = h.tracker.add_derived("Z", "mexc_X / mexc_Q").await.unwrap_err();
    match err {
        TrackerError::InvalidFormula { name, error } => {
            assert_eq!(name, "Z");
            assert_eq!(error, ValidationError::UnknownVariable("mexc_q".into()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.tracker.derived_formulas().await.is_empty());
}

#[tokio::test]
async fn test_reenable_with_reset_fires_again() {
    let mut sink = MockSink::new();
    sink.expect_send().times(2).returning(|_, _| Ok(()));

    let h = Harness::new(Arc::new(sink), None);
    h.tracker.add_subscription("mexc", "X").await.unwrap();
    h.quote("X", 10.0);
    h.tracker
        .add_alert(NewAlert {
            instrument: "mexc_X".into(),
            condition: "price >= 10".into(),
            message: "{ticker} at {price}".into(),
            min_interval_secs: 0,
            max_activations: Some(1),
        })
        .await
        .unwrap();

    h.tick_at(1).await;
    assert!(!h.tracker.alerts().await[0].enabled);

    // Enabled again but still at the cap: flips back without firing.
    h.tracker
        .enable_alert("mexc_X", "price >= 10", EnableOptions::default())
        .await
        .unwrap();
    h.tick_at(2).await;
    let alert = &h.tracker.alerts().await[0];
    assert!(!alert.enabled);
    assert_eq!(alert.activation_count, 1);

    let options = EnableOptions {
        reset: true,
        max_activations: Some(1),
    };
    let view = h.tracker.enable_alert("mexc_X", "price >= 10", options).await.unwrap();
    assert_eq!(view.activation_count, 0);
    h.tick_at(3).await;
    assert_eq!(h.tracker.alerts().await[0].activation_count, 1);
}

#[tokio::test]
async fn test_disabled_alert_stays_silent() {
    let h = Harness::new(silent_notifier(), None);
    h.tracker.add_subscription("mexc", "X").await.unwrap();
    h.quote("X", 10.0);
    h.tracker
        .add_alert(NewAlert {
            instrument: "mexc_X".into(),
            condition: "price > 1".into(),
            message: "{ticker}".into(),
            ..NewAlert::default()
        })
        .await
        .unwrap();
    h.tracker.disable_alert("mexc_X", "price > 1").await.unwrap();
    h.tick_at(1).await;
    assert_eq!(h.tracker.alerts().await[0].activation_count, 0);
}

#[tokio::test]
async fn test_alert_registration_errors() {
    let h = Harness::new(silent_notifier(), None);
    h.tracker.add_subscription("mexc", "X").await.unwrap();

    let unknown = NewAlert {
        instrument: "mexc_Q".into(),
        condition: "price > 1".into(),
        message: "m".into(),
        ..NewAlert::default()
    };
    assert!(matches!(h.tracker.add_alert(unknown).await, Err(TrackerError::UnknownKey(_))));

    let not_boolean = NewAlert {
        instrument: "mexc_X".into(),
        condition: "price + 1".into(),
        message: "m".into(),
        ..NewAlert::default()
    };
    assert!(matches!(
        h.tracker.add_alert(not_boolean).await,
        Err(TrackerError::InvalidCondition { .. })
    ));

    let alert = NewAlert {
        instrument: "mexc_X".into(),
        condition: "price > 1".into(),
        message: "m".into(),
        ..NewAlert::default()
    };
    h.tracker.add_alert(alert.clone()).await.unwrap();
    assert!(matches!(
        h.tracker.add_alert(alert).await,
        Err(TrackerError::DuplicateAlert { .. })
    ));

    let missing = h.tracker.remove_alert("mexc_X", "price > 2").await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_subscription_commands_reach_the_feed() {
    let mut h = Harness::new(silent_notifier(), None);

    assert!(h.tracker.add_subscription("MEXC", "BTCUSDT").await.unwrap());
    assert!(!h.tracker.add_subscription("mexc", "btcusdt").await.unwrap());
    assert_eq!(h.commands.try_recv().unwrap(), FeedCommand::Subscribe("BTCUSDT".into()));
    assert!(h.commands.try_recv().is_err());

    h.quote("BTCUSDT", 67000.0);
    h.tracker.remove_subscription("mexc", "BTCUSDT").await.unwrap();
    assert_eq!(h.commands.try_recv().unwrap(), FeedCommand::Unsubscribe("BTCUSDT".into()));
    assert!(h.tracker.current_prices(false).is_empty());

    let err = h.tracker.remove_subscription("mexc", "BTCUSDT").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        h.tracker.add_subscription("binance", "BTCUSDT").await,
        Err(TrackerError::UnknownSource(_))
    ));
}

#[tokio::test]
async fn test_instruments_listing_includes_derived() {
    let h = Harness::new(silent_notifier(), None);
    h.tracker.add_subscription("mexc", "BTCUSDT").await.unwrap();
    h.tracker.add_derived("Double", "mexc_BTCUSDT * 2").await.unwrap();

    let listing = h.tracker.instruments().await;
    assert_eq!(listing["mexc"], vec!["BTCUSDT".to_string()]);
    assert_eq!(listing["Calculated"], vec!["Double".to_string()]);

    h.tracker.remove_derived("Double").await.unwrap();
    assert!(h.tracker.instruments().await["Calculated"].is_empty());
    assert!(h.tracker.remove_derived("Double").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_recorder_stores_changes_only() {
    let history = Arc::new(MemoryHistory::default());
    let h = Harness::new(silent_notifier(), Some(history.clone()));
    h.tracker.add_subscription("mexc", "X").await.unwrap();

    h.quote("X", 1.0);
    h.tick_at(1).await;
    h.tick_at(2).await;
    h.quote("X", 2.0);
    h.tick_at(3).await;

    let changes = history.changes.lock().await;
    let prices: Vec<f64> = changes.iter().map(|c| c.price).collect();
    assert_eq!(prices, vec![1.0, 2.0]);
    assert!(changes.iter().all(|c| c.source == "mexc" && c.instrument == "X"));
}

#[tokio::test]
async fn test_start_and_shutdown() {
    let h = Harness::new(silent_notifier(), None);
    h.tracker.start().await;
    tokio::time::timeout(Duration::from_secs(5), h.tracker.shutdown())
        .await
        .expect("tracker did not stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enable_keeps_every_activation() {
    let sent = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sent);
    let mut sink = MockSink::new();
    sink.expect_send().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let h = Harness::new(Arc::new(sink), None);
    h.tracker.add_subscription("mexc", "X").await.unwrap();
    h.tracker
        .add_alert(NewAlert {
            instrument: "mexc_X".into(),
            condition: "price > 1".into(),
            message: "{ticker} {price}".into(),
            min_interval_secs: 0,
            max_activations: Some(10_000),
        })
        .await
        .unwrap();
    h.quote("X", 2.0);

    let Harness {
        tracker,
        clock: _clock,
        cache: _cache,
        commands: _commands,
        _state,
    } = h;
    let tracker = Arc::new(tracker);

    let ticker = Arc::clone(&tracker);
    let ticks = tokio::spawn(async move {
        for _ in 0..200 {
            ticker.tick().await;
        }
    });
    let enabler = Arc::clone(&tracker);
    let enables = tokio::spawn(async move {
        for _ in 0..200 {
            enabler
                .enable_alert("mexc_X", "price > 1", EnableOptions::default())
                .await
                .unwrap();
            tokio::task::yield_now().await;
        }
    });
    ticks.await.unwrap();
    enables.await.unwrap();

    let alert = &tracker.alerts().await[0];
    assert_eq!(alert.activation_count as usize, sent.load(Ordering::SeqCst));
    assert_eq!(alert.activation_count, 200);
    assert!(alert.enabled);
}
