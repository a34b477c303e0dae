//! HTTP API Integration - Routes, Status Codes and Rate Limiting
//!
//! Serves the real router on an ephemeral port and drives it with
//! reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use price_tracker::adapters::api::{router, ApiState};
use price_tracker::adapters::metrics::MetricsRegistry;
use price_tracker::adapters::notify::LogNotifier;
use price_tracker::domain::PriceSample;
use price_tracker::ports::{ConnectionState, FeedHandle, ManualClock, PriceChange, PriceHistory};
use price_tracker::usecases::{PriceCache, Tracker, TrackerParts};

struct FixedHistory;

#[async_trait::async_trait]
impl PriceHistory for FixedHistory {
    async fn record(&self, _change: &PriceChange) -> anyhow::Result<()> {
        Ok(())
    }

    async fn recent(
        &self,
        source: &str,
        instrument: &str,
        since: i64,
        _limit: usize,
    ) -> anyhow::Result<Vec<PriceChange>> {
        Ok(vec![PriceChange {
            source: source.to_string(),
            instrument: instrument.to_string(),
            timestamp: since,
            price: 1.0,
        }])
    }
}

struct Server {
    base: String,
    client: reqwest::Client,
    cache: Arc<PriceCache>,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn serve(requests_per_minute: u32) -> Server {
    let cache = Arc::new(PriceCache::new());
    let clock = Arc::new(ManualClock::new(1_000));
    let history: Arc<dyn PriceHistory> = Arc::new(FixedHistory);
    let mut tracker = Tracker::new(TrackerParts {
        cache: Arc::clone(&cache),
        clock: clock.clone(),
        notifier: Arc::new(LogNotifier),
        destination: String::new(),
        history: Some(Arc::clone(&history)),
        metrics: Arc::new(MetricsRegistry::new().unwrap()),
        tick_interval: Duration::from_secs(1),
    });
    let (tx, _rx) = mpsc::unbounded_channel();
    let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
    tracker.add_feed(FeedHandle::new("mexc", tx, state_rx));

    let state = ApiState {
        tracker: Arc::new(tracker),
        history: Some(history),
        clock,
        history_window_secs: 120,
        history_limit: 120,
    };
    let app = router(state, requests_per_minute);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        base,
        client: reqwest::Client::new(),
        cache,
    }
}

#[tokio::test]
async fn test_ticker_lifecycle() {
    let server = serve(600).await;

    let resp = server
        .client
        .post(server.url("/api/tickers"))
        .json(&json!({"exchange": "mexc", "symbol": "BTCUSDT"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Ticker mexc_BTCUSDT added successfully");

    let listing: Value = server
        .client
        .get(server.url("/api/tickers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["mexc"], json!(["BTCUSDT"]));
    assert_eq!(listing["Calculated"], json!([]));

    server
        .cache
        .put(PriceSample::new("mexc", "BTCUSDT", 1_000, 67_000.5));
    let prices: Value = server
        .client
        .get(server.url("/api/current_price"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(prices["mexc_btcusdt"]["price"], 67_000.5);
    assert_eq!(prices["mexc_btcusdt"]["timestamp"], 1_000);

    let resp = server
        .client
        .delete(server.url("/api/tickers"))
        .json(&json!({"exchange": "mexc", "symbol": "BTCUSDT"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = server
        .client
        .delete(server.url("/api/tickers"))
        .json(&json!({"exchange": "mexc", "symbol": "BTCUSDT"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("BTCUSDT"));
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let server = serve(600).await;

    let missing = server
        .client
        .post(server.url("/api/tickers"))
        .json(&json!({"exchange": "mexc"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);

    let unknown_source = server
        .client
        .post(server.url("/api/tickers"))
        .json(&json!({"exchange": "nowhere", "symbol": "BTCUSDT"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_source.status(), 400);

    let bad_formula = server
        .client
        .post(server.url("/api/calculated_tickers"))
        .json(&json!({"name": "R", "formula": "mexc_BTCUSDT / 2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_formula.status(), 400);
}

#[tokio::test]
async fn test_malformed_bodies_use_error_body() {
    let server = serve(600).await;
    let client = &server.client;

    let no_content_type = client
        .post(server.url("/api/tickers"))
        .body(r#"{"exchange": "mexc", "symbol": "BTCUSDT"}"#)
        .send()
        .await
        .unwrap();
    let not_json = client
        .post(server.url("/api/calculated_tickers"))
        .header("content-type", "application/json")
        .body("{name: R")
        .send()
        .await
        .unwrap();
    let negative_cap = client
        .post(server.url("/api/alerts"))
        .json(&json!({
            "ticker": "mexc_BTCUSDT",
            "condition": "price > 1",
            "message": "m",
            "max_activations": -1
        }))
        .send()
        .await
        .unwrap();

    for resp in [no_content_type, not_json, negative_cap] {
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_oversized_formula_rejected() {
    let server = serve(600).await;
    server
        .client
        .post(server.url("/api/tickers"))
        .json(&json!({"exchange": "mexc", "symbol": "BTCUSDT"}))
        .send()
        .await
        .unwrap();

    let formula = vec!["mexc_BTCUSDT"; 100_000].join(" + ");
    let resp = server
        .client
        .post(server.url("/api/calculated_tickers"))
        .json(&json!({"name": "HUGE", "formula": formula}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let formulas: Value = server
        .client
        .get(server.url("/api/calculated_tickers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(formulas, json!({}));
}

#[tokio::test]
async fn test_derived_and_alert_routes() {
    let server = serve(600).await;
    let client = &server.client;

    client
        .post(server.url("/api/tickers"))
        .json(&json!({"exchange": "mexc", "symbol": "BTCUSDT"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(server.url("/api/calculated_tickers"))
        .json(&json!({"name": "DOUBLE", "formula": "mexc_BTCUSDT * 2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let formulas: Value = client
        .get(server.url("/api/calculated_tickers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(formulas, json!({"DOUBLE": "mexc_BTCUSDT * 2"}));

    let resp = client
        .post(server.url("/api/alerts"))
        .json(&json!({
            "ticker": "Calculated_DOUBLE",
            "condition": "price > 10",
            "message": "{ticker} at {price}",
            "min_interval": 30,
            "max_activations": 2
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let alerts: Value = client
        .get(server.url("/api/alerts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts[0]["ticker"], "calculated_double");
    assert_eq!(alerts[0]["min_interval"], 30);
    assert_eq!(alerts[0]["max_activations"], 2);
    assert_eq!(alerts[0]["enabled"], true);

    let resp = client
        .patch(server.url("/api/alerts"))
        .json(&json!({"ticker": "Calculated_DOUBLE", "condition": "price > 10", "enabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Alert for Calculated_DOUBLE disabled successfully");

    let resp = client
        .patch(server.url("/api/alerts"))
        .json(&json!({"ticker": "Calculated_DOUBLE", "condition": "price < 10", "enabled": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(server.url("/api/alerts"))
        .json(&json!({"ticker": "Calculated_DOUBLE", "condition": "price > 10"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(server.url("/api/calculated_tickers"))
        .json(&json!({"name": "DOUBLE"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_price_history_covers_every_instrument() {
    let server = serve(600).await;
    let client = &server.client;

    client
        .post(server.url("/api/tickers"))
        .json(&json!({"exchange": "mexc", "symbol": "BTCUSDT"}))
        .send()
        .await
        .unwrap();
    client
        .post(server.url("/api/calculated_tickers"))
        .json(&json!({"name": "HALF", "formula": "mexc_BTCUSDT / 2"}))
        .send()
        .await
        .unwrap();

    let history: Value = client
        .get(server.url("/api/prices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // window starts at clock (1000) minus 120s
    assert_eq!(history["mexc_btcusdt"], json!([{"price": 1.0, "timestamp": 880}]));
    assert_eq!(history["calculated_half"], json!([{"price": 1.0, "timestamp": 880}]));
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let server = serve(2).await;

    for _ in 0..2 {
        let resp = server.client.get(server.url("/api/tickers")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }
    let resp = server.client.get(server.url("/api/tickers")).send().await.unwrap();
    assert_eq!(resp.status(), 429);
}
