//! KuCoin WebSocket Feed - Token Handshake + Ticker Topic
//!
//! KuCoin requires a public token before the socket opens: POST
//! `/api/v1/bullet-public`, then dial
//! `<instance endpoint>?token=<token>&connectId=<uuid>`.
//! Tickers arrive on `/market/ticker:<SYM>,<SYM>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::FeedError;
use crate::ports::{FeedConnector, Quote};

use super::parse_price;

/// Successful bullet-public response code.
const SUCCESS_CODE: &str = "200000";

const TICKER_TOPIC: &str = "/market/ticker:";

#[derive(Debug, Deserialize)]
struct BulletResponse {
    code: String,
    data: Option<BulletData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulletData {
    token: String,
    instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Deserialize)]
struct InstanceServer {
    endpoint: String,
}

/// Incoming frame envelope.
#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    topic: Option<String>,
    data: Option<TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    price: Option<String>,
}

/// KuCoin spot ticker connector.
pub struct KucoinConnector {
    /// HTTP client for the token handshake.
    client: reqwest::Client,
    /// Token endpoint.
    bullet_url: String,
}

impl KucoinConnector {
    pub fn new(bullet_url: impl Into<String>, http_timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Self {
            client,
            bullet_url: bullet_url.into(),
        })
    }

    fn topic_message(kind: &str, instruments: &[String]) -> String {
        json!({
            "id": Utc::now().timestamp_millis(),
            "type": kind,
            "topic": format!("{TICKER_TOPIC}{}", instruments.join(",")),
            "privateChannel": false,
            "response": true,
        })
        .to_string()
    }
}

#[async_trait]
impl FeedConnector for KucoinConnector {
    fn source(&self) -> &str {
        "kucoin"
    }

    #[instrument(skip(self))]
    async fn connect(&self) -> Result<String, FeedError> {
        let response: BulletResponse = self
            .client
            .post(&self.bullet_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.code != SUCCESS_CODE {
            return Err(FeedError::Handshake(format!(
                "bullet-public returned code {}",
                response.code
            )));
        }
        let data = response
            .data
            .ok_or_else(|| FeedError::Handshake("bullet-public returned no data".to_string()))?;
        let server = data
            .instance_servers
            .first()
            .ok_or_else(|| FeedError::Handshake("no instance servers offered".to_string()))?;

        debug!(endpoint = %server.endpoint, "KuCoin token acquired");
        Ok(format!(
            "{}?token={}&connectId={}",
            server.endpoint,
            data.token,
            Uuid::new_v4()
        ))
    }

    fn subscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        if instruments.is_empty() {
            return Vec::new();
        }
        vec![Self::topic_message("subscribe", instruments)]
    }

    fn unsubscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        if instruments.is_empty() {
            return Vec::new();
        }
        vec![Self::topic_message("unsubscribe", instruments)]
    }

    fn parse_message(&self, raw: &str) -> Result<Option<Quote>, FeedError> {
        let frame: Frame = serde_json::from_str(raw)?;
        if frame.kind != "message" {
            // welcome, ack, pong
            return Ok(None);
        }
        let (Some(topic), Some(data)) = (frame.topic, frame.data) else {
            return Ok(None);
        };
        let Some(instrument) = topic.strip_prefix(TICKER_TOPIC) else {
            return Ok(None);
        };
        let price = data
            .price
            .ok_or_else(|| FeedError::Parse(format!("ticker for {instrument} has no price")))?;

        Ok(Some(Quote::new(instrument, parse_price(&price)?)))
    }

    fn keepalive_message(&self) -> String {
        json!({
            "id": Utc::now().timestamp_millis(),
            "type": "ping",
        })
        .to_string()
    }
}
