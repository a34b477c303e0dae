//! Gate.io WebSocket Feed - `spot.tickers` Channel
//!
//! Static endpoint, no handshake. Updates carry the pair in
//! `result.currency_pair` and the last price in `result.last`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::domain::FeedError;
use crate::ports::{FeedConnector, Quote};

use super::parse_price;

const TICKERS_CHANNEL: &str = "spot.tickers";

#[derive(Debug, Deserialize)]
struct Frame {
    channel: Option<String>,
    event: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    currency_pair: String,
    last: String,
}

/// Gate.io spot ticker connector.
pub struct GateioConnector {
    ws_url: String,
}

impl GateioConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    fn channel_message(event: &str, instruments: &[String]) -> String {
        json!({
            "time": Utc::now().timestamp(),
            "channel": TICKERS_CHANNEL,
            "event": event,
            "payload": instruments,
        })
        .to_string()
    }
}

#[async_trait]
impl FeedConnector for GateioConnector {
    fn source(&self) -> &str {
        "gateio"
    }

    async fn connect(&self) -> Result<String, FeedError> {
        Ok(self.ws_url.clone())
    }

    fn subscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        if instruments.is_empty() {
            return Vec::new();
        }
        vec![Self::channel_message("subscribe", instruments)]
    }

    fn unsubscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        if instruments.is_empty() {
            return Vec::new();
        }
        vec![Self::channel_message("unsubscribe", instruments)]
    }

    fn parse_message(&self, raw: &str) -> Result<Option<Quote>, FeedError> {
        let frame: Frame = serde_json::from_str(raw)?;
        if frame.channel.as_deref() != Some(TICKERS_CHANNEL) || frame.event.as_deref() != Some("update")
        {
            // subscribe acks, pongs
            return Ok(None);
        }
        let Some(result) = frame.result else {
            return Ok(None);
        };
        let ticker: TickerResult = serde_json::from_value(result)?;
        Ok(Some(Quote::new(ticker.currency_pair, parse_price(&ticker.last)?)))
    }

    fn keepalive_message(&self) -> String {
        json!({
            "time": Utc::now().timestamp_millis(),
            "channel": "spot.ping",
        })
        .to_string()
    }
}
