//! MEXC WebSocket Feed - Mini Ticker Stream
//!
//! Subscribes to `spot@public.miniTicker.v3.api@<SYM>@UTC+2`. The
//! channel name is echoed back in `c`; the symbol is its second-to-last
//! `@` segment and the price is `d.p`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::FeedError;
use crate::ports::{FeedConnector, Quote};

use super::parse_price;

const MINI_TICKER: &str = "spot@public.miniTicker";
const TIMEZONE: &str = "UTC+2";

#[derive(Debug, Deserialize)]
struct Frame {
    /// Channel.
    c: Option<String>,
    /// Payload.
    d: Option<MiniTicker>,
}

#[derive(Debug, Deserialize)]
struct MiniTicker {
    /// Last price.
    p: Option<String>,
}

/// MEXC spot mini-ticker connector.
pub struct MexcConnector {
    ws_url: String,
}

impl MexcConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    fn channel(instrument: &str) -> String {
        format!("{MINI_TICKER}.v3.api@{instrument}@{TIMEZONE}")
    }

    fn method_message(method: &str, instruments: &[String]) -> String {
        let params: Vec<String> = instruments.iter().map(|i| Self::channel(i)).collect();
        json!({
            "method": method,
            "params": params,
        })
        .to_string()
    }
}

#[async_trait]
impl FeedConnector for MexcConnector {
    fn source(&self) -> &str {
        "mexc"
    }

    async fn connect(&self) -> Result<String, FeedError> {
        Ok(self.ws_url.clone())
    }

    fn subscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        if instruments.is_empty() {
            return Vec::new();
        }
        vec![Self::method_message("SUBSCRIPTION", instruments)]
    }

    fn unsubscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        if instruments.is_empty() {
            return Vec::new();
        }
        vec![Self::method_message("UNSUBSCRIPTION", instruments)]
    }

    fn parse_message(&self, raw: &str) -> Result<Option<Quote>, FeedError> {
        let frame: Frame = serde_json::from_str(raw)?;
        let Some(channel) = frame.c.filter(|c| c.contains(MINI_TICKER)) else {
            // subscription acks and PONG replies
            return Ok(None);
        };
        let Some(price) = frame.d.and_then(|d| d.p) else {
            return Ok(None);
        };

        let mut segments = channel.rsplit('@');
        let instrument = match (segments.next(), segments.next()) {
            (Some(_), Some(symbol)) if !symbol.is_empty() => symbol.to_string(),
            _ => return Err(FeedError::Parse(format!("unexpected channel {channel}"))),
        };

        Ok(Some(Quote::new(instrument, parse_price(&price)?)))
    }

    fn keepalive_message(&self) -> String {
        json!({ "method": "PING" }).to_string()
    }
}
