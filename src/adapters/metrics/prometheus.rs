//! Prometheus Metrics Registry - Tracker Observability
//!
//! Registers and exposes Prometheus metrics for feed health, price
//! throughput, derived-instrument failures and alert delivery.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Centralized Prometheus metrics for the tracker.
///
/// All metrics follow the naming convention `price_tracker_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Feed connection status (1 = connected, 0 = otherwise).
    pub feed_connected: GaugeVec,
    /// Price samples written to the cache per source.
    pub price_updates: IntCounterVec,
    /// Frames dropped because they could not be parsed.
    pub parse_errors: IntCounterVec,
    /// Transport drops followed by a reconnect attempt.
    pub reconnects: IntCounterVec,
    /// Derived-instrument formulas that failed to evaluate.
    pub derived_evaluation_errors: IntCounterVec,
    /// Alert activations.
    pub alerts_fired: IntCounter,
    /// Notifications that could not be delivered.
    pub notification_failures: IntCounter,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let feed_connected = GaugeVec::new(
            Opts::new(
                "price_tracker_feed_connected",
                "Feed connection status (1=connected, 0=disconnected)",
            ),
            &["source"],
        )?;

        let price_updates = IntCounterVec::new(
            Opts::new(
                "price_tracker_price_updates_total",
                "Price samples written to the cache",
            ),
            &["source"],
        )?;

        let parse_errors = IntCounterVec::new(
            Opts::new(
                "price_tracker_parse_errors_total",
                "Incoming frames dropped as unparseable",
            ),
            &["source"],
        )?;

        let reconnects = IntCounterVec::new(
            Opts::new(
                "price_tracker_reconnects_total",
                "Reconnect attempts after a transport failure",
            ),
            &["source"],
        )?;

        let derived_evaluation_errors = IntCounterVec::new(
            Opts::new(
                "price_tracker_derived_evaluation_errors_total",
                "Derived instrument evaluations that failed",
            ),
            &["name"],
        )?;

        let alerts_fired = IntCounter::new(
            "price_tracker_alerts_fired_total",
            "Alert activations",
        )?;

        let notification_failures = IntCounter::new(
            "price_tracker_notification_failures_total",
            "Alert notifications that could not be delivered",
        )?;

        registry.register(Box::new(feed_connected.clone()))?;
        registry.register(Box::new(price_updates.clone()))?;
        registry.register(Box::new(parse_errors.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(derived_evaluation_errors.clone()))?;
        registry.register(Box::new(alerts_fired.clone()))?;
        registry.register(Box::new(notification_failures.clone()))?;

        Ok(Self {
            registry,
            feed_connected,
            price_updates,
            parse_errors,
            reconnects,
            derived_evaluation_errors,
            alerts_fired,
            notification_failures,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
