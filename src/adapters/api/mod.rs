//! HTTP API Adapter - Tracker Control Surface
//!
//! JSON endpoints over the `Tracker` configuration commands and
//! queries, served by axum 0.7 behind a global governor quota.
//!
//! Sub-modules:
//! - `handlers`: one handler per route and method
//! - `rate_limit`: token-bucket middleware (429 on exhaustion)
//! - `types`: request/response bodies and error mapping

pub mod handlers;
pub mod rate_limit;
pub mod types;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::config::{ApiConfig, PersistenceConfig};
use crate::ports::{Clock, PriceHistory};
use crate::usecases::Tracker;

/// State shared by every handler.
#[derive(Clone)]
pub struct ApiState {
  pub tracker: Arc<Tracker>,
  /// Source of `GET /api/prices`; empty responses when absent.
  pub history: Option<Arc<dyn PriceHistory>>,
  pub clock: Arc<dyn Clock>,
  pub history_window_secs: i64,
  pub history_limit: usize,
}

impl ApiState {
  pub fn new(
    tracker: Arc<Tracker>,
    history: Option<Arc<dyn PriceHistory>>,
    clock: Arc<dyn Clock>,
    persistence: &PersistenceConfig,
  ) -> Self {
    Self {
      tracker,
      history,
      clock,
      history_window_secs: i64::try_from(persistence.history_window_secs).unwrap_or(i64::MAX),
      history_limit: persistence.history_limit,
    }
  }
}

/// Build the API router with its rate limiter.
pub fn router(state: ApiState, requests_per_minute: u32) -> Router {
  Router::new()
    .route("/api/current_price", get(handlers::current_prices))
    .route("/api/prices", get(handlers::price_history))
    .route(
      "/api/tickers",
      get(handlers::list_tickers)
        .post(handlers::add_ticker)
        .delete(handlers::remove_ticker),
    )
    .route(
      "/api/calculated_tickers",
      get(handlers::list_derived)
        .post(handlers::add_derived)
        .delete(handlers::remove_derived),
    )
    .route(
      "/api/alerts",
      get(handlers::list_alerts)
        .post(handlers::add_alert)
        .delete(handlers::remove_alert)
        .patch(handlers::patch_alert),
    )
    .with_state(state)
    .layer(middleware::from_fn_with_state(
      rate_limit::limiter(requests_per_minute),
      rate_limit::enforce,
    ))
}

/// Axum server for the control API.
pub struct ApiServer {
  state: ApiState,
  bind_address: String,
  requests_per_minute: u32,
}

impl ApiServer {
  pub fn new(state: ApiState, config: &ApiConfig) -> Self {
    Self {
      state,
      bind_address: config.bind_address.clone(),
      requests_per_minute: config.requests_per_minute,
    }
  }

  /// Serve until the shutdown signal fires.
  #[instrument(skip(self, shutdown_rx))]
  pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let app = router(self.state, self.requests_per_minute);
    let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

    info!(address = %self.bind_address, "API server started");

    axum::serve(listener, app)
      .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
      })
      .await?;

    Ok(())
  }
}
