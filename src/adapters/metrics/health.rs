//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7 for Docker
//! health checks and monitoring. Readiness requires at least one
//! feed to be connected.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

use crate::ports::{ConnectionState, FeedHandle};

/// Connection state of every feed, polled by readiness probes.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    feeds: BTreeMap<String, watch::Receiver<ConnectionState>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the connection state of a feed.
    pub fn watch_feed(&mut self, handle: &FeedHandle) {
        self.feeds
            .insert(handle.source().to_string(), handle.state_watch());
    }

    /// Current state per source.
    pub fn feed_states(&self) -> BTreeMap<String, String> {
        self.feeds
            .iter()
            .map(|(source, rx)| (source.clone(), rx.borrow().to_string()))
            .collect()
    }

    /// Ready once any feed is connected.
    pub fn is_ready(&self) -> bool {
        self.feeds
            .values()
            .any(|rx| *rx.borrow() == ConnectionState::Connected)
    }
}

/// Axum-based health check HTTP server.
///
/// Serves liveness (/live) and readiness (/ready) endpoints for
/// Docker health checks and orchestrator probes.
pub struct HealthServer {
    state: Arc<HealthState>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    pub fn new(state: HealthState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Start the health check server.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state));

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: 200 with per-feed states once a feed is connected.
    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        let status = if state.is_ready() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(state.feed_states()))
    }
}
