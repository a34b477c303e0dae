//! Market Data Feed Adapters - Real-time Price Streaming
//!
//! Provides WebSocket-based price feeds from:
//! - KuCoin: token handshake, `/market/ticker` topic
//! - Gate.io: `spot.tickers` channel
//! - MEXC: `spot@public.miniTicker` stream
//! - Supervisor: shared reconnect / keepalive / subscription loop

pub mod gateio;
pub mod kucoin;
pub mod mexc;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub use gateio::GateioConnector;
pub use kucoin::KucoinConnector;
pub use mexc::MexcConnector;
pub use supervisor::{FeedSupervisor, SupervisorSettings};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::EndpointsConfig;
use crate::domain::FeedError;
use crate::ports::{Clock, FeedConnector, FeedHandle};
use crate::usecases::PriceCache;

/// Parse a decimal price string as sent by every supported exchange.
pub(crate) fn parse_price(raw: &str) -> Result<f64, FeedError> {
    let price: f64 = raw
        .trim()
        .parse()
        .map_err(|_| FeedError::Parse(format!("invalid price {raw:?}")))?;
    if price.is_finite() {
        Ok(price)
    } else {
        Err(FeedError::Parse(format!("non-finite price {raw:?}")))
    }
}

/// Shared collaborators every supervisor writes through.
#[derive(Clone)]
pub struct FeedContext {
    pub cache: Arc<PriceCache>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsRegistry>,
    pub settings: SupervisorSettings,
}

impl FeedContext {
    /// Build the supervisor for `connector` and start it.
    pub fn spawn<C: FeedConnector>(
        &self,
        connector: C,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (FeedHandle, JoinHandle<()>) {
        let (supervisor, handle) = FeedSupervisor::new(
            connector,
            Arc::clone(&self.cache),
            Arc::clone(&self.clock),
            Arc::clone(&self.metrics),
            self.settings,
        );
        (handle, supervisor.spawn(shutdown_rx))
    }

    /// Start the supervisor for a named source.
    pub fn spawn_source(
        &self,
        source: &str,
        endpoints: &EndpointsConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(FeedHandle, JoinHandle<()>)> {
        let started = match source.to_ascii_lowercase().as_str() {
            "kucoin" => {
                let timeout = Duration::from_secs(endpoints.http_timeout_secs);
                let connector = KucoinConnector::new(endpoints.kucoin_bullet_url.clone(), timeout)?;
                self.spawn(connector, shutdown_rx)
            }
            "gateio" => self.spawn(GateioConnector::new(endpoints.gateio_ws_url.clone()), shutdown_rx),
            "mexc" => self.spawn(MexcConnector::new(endpoints.mexc_ws_url.clone()), shutdown_rx),
            other => bail!("unknown source: {other}"),
        };
        Ok(started)
    }
}
