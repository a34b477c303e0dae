//! Price Tracker - Entry Point
//!
//! Initializes configuration, logging, feeds and the tracker engines.
//! Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load .env + config.toml (path overridable via `TRACKER_CONFIG`)
//! 2. Init tracing (JSON structured logging)
//! 3. Create metrics registry and notifier (Telegram, or log fallback)
//! 4. Open the JSONL price history when persistence is enabled
//! 5. Build the Tracker
//! 6. Spawn one feed supervisor per source and register its handle
//! 7. Apply the startup subscriptions, derived instruments and alerts
//! 8. Start the derived, alert and recorder loops
//! 9. Spawn the API, metrics and health servers
//! 10. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use price_tracker::adapters::api::{ApiServer, ApiState};
use price_tracker::adapters::feeds::{FeedContext, SupervisorSettings};
use price_tracker::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use price_tracker::adapters::notify::{LogNotifier, TelegramCredentials, TelegramNotifier};
use price_tracker::adapters::persistence::JsonlPriceLog;
use price_tracker::config::{self, loader::SOURCES, AppConfig};
use price_tracker::ports::{Clock, Notifier, PriceHistory, SystemClock};
use price_tracker::usecases::{PriceCache, Tracker, TrackerParts};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    dotenv::dotenv().ok();
    let config_path = std::env::var("TRACKER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.tracker.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.tracker.name,
        version = env!("CARGO_PKG_VERSION"),
        subscriptions = config.subscriptions.len(),
        derived = config.derived.len(),
        alerts = config.alerts.len(),
        "Starting price tracker"
    );

    // ── 3. Metrics and notifier ─────────────────────────────
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);
    let (notifier, destination) = build_notifier(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ── 4. Price history ────────────────────────────────────
    let history: Option<Arc<dyn PriceHistory>> = if config.persistence.enabled {
        let log = JsonlPriceLog::new(&config.persistence.data_dir)
            .await
            .context("Failed to open price history")?;
        anyhow::ensure!(
            log.is_healthy().await,
            "Price history directory {} is not writable",
            config.persistence.data_dir
        );
        Some(Arc::new(log))
    } else {
        warn!("Persistence disabled, price changes are not recorded");
        None
    };

    // ── 5. Tracker ──────────────────────────────────────────
    let cache = Arc::new(PriceCache::new());
    let mut tracker = Tracker::new(TrackerParts {
        cache: Arc::clone(&cache),
        clock: Arc::clone(&clock),
        notifier,
        destination,
        history: history.clone(),
        metrics: Arc::clone(&metrics),
        tick_interval: Duration::from_millis(config.engine.tick_interval_ms),
    });

    // ── 6. Feed supervisors ─────────────────────────────────
    let feeds = FeedContext {
        cache,
        clock: Arc::clone(&clock),
        metrics: Arc::clone(&metrics),
        settings: SupervisorSettings::from(&config.feeds),
    };
    let mut health = HealthState::new();
    let mut feed_tasks = Vec::with_capacity(SOURCES.len());
    for source in SOURCES {
        let (handle, task) = feeds
            .spawn_source(source, &config.endpoints, tracker.shutdown_signal())
            .with_context(|| format!("Failed to start {source} feed"))?;
        health.watch_feed(&handle);
        tracker.add_feed(handle);
        feed_tasks.push(task);
    }

    let tracker = Arc::new(tracker);
    for task in feed_tasks {
        tracker.attach(task).await;
    }

    // ── 7. Startup configuration (fatal on error) ───────────
    tracker
        .apply_config(&config)
        .await
        .context("Invalid startup configuration")?;

    // ── 8. Periodic engines ─────────────────────────────────
    tracker.start().await;

    // ── 9. API, metrics and health servers ──────────────────
    if config.api.enabled {
        let state = ApiState::new(Arc::clone(&tracker), history, clock, &config.persistence);
        let server = ApiServer::new(state, &config.api);
        let shutdown = tracker.shutdown_signal();
        tracker
            .attach(tokio::spawn(async move {
                if let Err(e) = server.run(shutdown).await {
                    error!(error = %e, "API server failed");
                }
            }))
            .await;
    }

    if config.metrics.enabled {
        let bind = config.metrics.bind_address.clone();
        let shutdown = tracker.shutdown_signal();
        let registry = Arc::clone(&metrics);
        tracker
            .attach(tokio::spawn(async move {
                if let Err(e) = registry.serve(bind, shutdown).await {
                    error!(error = %e, "Metrics server failed");
                }
            }))
            .await;

        let server = HealthServer::new(health, config.metrics.health_port);
        let shutdown = tracker.shutdown_signal();
        tracker
            .attach(tokio::spawn(async move {
                if let Err(e) = server.run(shutdown).await {
                    error!(error = %e, "Health server failed");
                }
            }))
            .await;
    }

    info!("All tasks spawned, tracker is running");

    // ── 10. Wait for SIGINT ─────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    if tokio::time::timeout(Duration::from_secs(30), tracker.shutdown())
        .await
        .is_err()
    {
        warn!("Shutdown timed out, exiting anyway");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Telegram when enabled and credentials are present, log output otherwise.
fn build_notifier(config: &AppConfig) -> Result<(Arc<dyn Notifier>, String)> {
    if !config.notifications.enabled {
        info!("Notifications disabled, alerts are logged only");
        return Ok((Arc::new(LogNotifier), String::new()));
    }
    match TelegramCredentials::from_env() {
        Some(credentials) => {
            let notifier = TelegramNotifier::new(&config.notifications, &credentials)
                .context("Failed to create Telegram notifier")?;
            info!(chat_id = %credentials.chat_id, "Telegram notifications enabled");
            Ok((Arc::new(notifier), credentials.chat_id))
        }
        None => {
            warn!("TELEGRAM_TOKEN / TELEGRAM_CHATID not set, alerts are logged only");
            Ok((Arc::new(LogNotifier), String::new()))
        }
    }
}
