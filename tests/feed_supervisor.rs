//! Feed Supervisor Integration - Against a Local WebSocket Server
//!
//! Runs a real supervisor against a tokio-tungstenite server bound to
//! 127.0.0.1 and checks the subscribe / stream / reconnect cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use price_tracker::adapters::feeds::{FeedContext, SupervisorSettings};
use price_tracker::adapters::metrics::MetricsRegistry;
use price_tracker::domain::FeedError;
use price_tracker::ports::{ConnectionState, FeedConnector, ManualClock, Quote};
use price_tracker::usecases::PriceCache;

/// Line protocol: `sub:<i>`, `unsub:<i>`, `ping` out; `<i>=<price>` in.
struct LocalConnector {
    url: String,
}

#[async_trait]
impl FeedConnector for LocalConnector {
    fn source(&self) -> &str {
        "local"
    }

    async fn connect(&self) -> Result<String, FeedError> {
        Ok(self.url.clone())
    }

    fn subscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        instruments.iter().map(|i| format!("sub:{i}")).collect()
    }

    fn unsubscribe_messages(&self, instruments: &[String]) -> Vec<String> {
        instruments.iter().map(|i| format!("unsub:{i}")).collect()
    }

    fn parse_message(&self, raw: &str) -> Result<Option<Quote>, FeedError> {
        let (instrument, price) = raw
            .split_once('=')
            .ok_or_else(|| FeedError::Parse(raw.to_string()))?;
        let price = price
            .parse()
            .map_err(|_| FeedError::Parse(raw.to_string()))?;
        Ok(Some(Quote::new(instrument, price)))
    }

    fn keepalive_message(&self) -> String {
        "ping".to_string()
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Next text frame other than a keepalive.
async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) if text != "ping" => return text,
            Some(Ok(_)) => {}
            other => panic!("connection ended: {other:?}"),
        }
    }
}

async fn wait_for_price(cache: &PriceCache, key: &str, expected: f64) {
    loop {
        if cache.get(key).is_some_and(|s| (s.price - expected).abs() < f64::EPSILON) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next text frame, keepalives included.
async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => {}
            other => panic!("connection ended: {other:?}"),
        }
    }
}

const QUIET: SupervisorSettings = SupervisorSettings {
    reconnect_delay: Duration::from_millis(50),
    receive_timeout: Duration::from_secs(5),
    keepalive_interval: Duration::from_secs(60),
};

fn context(cache: &Arc<PriceCache>, metrics: &Arc<MetricsRegistry>) -> FeedContext {
    context_with(cache, metrics, QUIET)
}

fn context_with(
    cache: &Arc<PriceCache>,
    metrics: &Arc<MetricsRegistry>,
    settings: SupervisorSettings,
) -> FeedContext {
    FeedContext {
        cache: Arc::clone(cache),
        clock: Arc::new(ManualClock::new(1_700_000_000)),
        metrics: Arc::clone(metrics),
        settings,
    }
}

/// Connect a supervisor with `settings` to a fresh local server and
/// count the keepalives it sends on an idle connection.
async fn idle_keepalives(settings: SupervisorSettings, wanted: usize) -> Arc<MetricsRegistry> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let cache = Arc::new(PriceCache::new());
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let (shutdown_tx, _) = broadcast::channel(1);
    let (handle, task) = context_with(&cache, &metrics, settings).spawn(LocalConnector { url }, shutdown_tx.subscribe());

    tokio::time::timeout(Duration::from_secs(10), async {
        let mut ws = accept(&listener).await;
        handle
            .state_watch()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        for _ in 0..wanted {
            assert_eq!(next_frame(&mut ws).await, "ping");
            assert_eq!(handle.state(), ConnectionState::Connected);
        }

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    })
    .await
    .expect("keepalive scenario timed out");

    metrics
}

#[tokio::test]
async fn test_stream_and_resubscribe_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let cache = Arc::new(PriceCache::new());
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let (shutdown_tx, _) = broadcast::channel(1);
    let (handle, task) = context(&cache, &metrics).spawn(LocalConnector { url }, shutdown_tx.subscribe());

    assert!(handle.subscribe("BTC-USDT").await);

    tokio::time::timeout(Duration::from_secs(10), async {
        // First session: subscribe, stream a quote, then drop the client.
        let mut ws = accept(&listener).await;
        assert_eq!(next_text(&mut ws).await, "sub:BTC-USDT");
        handle
            .state_watch()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        ws.send(Message::Text("btc_usdt=100.5".to_string())).await.unwrap();
        ws.send(Message::Text("ETH-USDT=3000".to_string())).await.unwrap();
        wait_for_price(&cache, "local_btc_usdt", 100.5).await;
        assert!(cache.get("local_eth_usdt").is_none());
        assert_eq!(cache.get("local_btc_usdt").unwrap().instrument, "BTC-USDT");
        ws.close(None).await.unwrap();
        drop(ws);

        // Second session: the whole intent set is replayed.
        let mut ws = accept(&listener).await;
        assert_eq!(next_text(&mut ws).await, "sub:BTC-USDT");
        ws.send(Message::Text("BTC-USDT=101".to_string())).await.unwrap();
        wait_for_price(&cache, "local_btc_usdt", 101.0).await;

        // Unsubscribe while connected: frame sent, price evicted.
        assert_eq!(handle.unsubscribe("btc_usdt").await.as_deref(), Some("BTC-USDT"));
        assert_eq!(next_text(&mut ws).await, "unsub:BTC-USDT");
        while cache.get("local_btc_usdt").is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    })
    .await
    .expect("supervisor scenario timed out");

    assert!(metrics.reconnects.with_label_values(&["local"]).get() >= 1);
    assert_eq!(metrics.price_updates.with_label_values(&["local"]).get(), 2);
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_subscribe_during_outage_applies_on_connect() {
    // Reserve a port, then close it so the first attempts are refused.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let cache = Arc::new(PriceCache::new());
    let metrics = Arc::new(MetricsRegistry::new().unwrap());
    let (shutdown_tx, _) = broadcast::channel(1);
    let url = format!("ws://{addr}");
    let (handle, task) = context(&cache, &metrics).spawn(LocalConnector { url }, shutdown_tx.subscribe());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_ne!(handle.state(), ConnectionState::Connected);
    assert!(handle.subscribe("ETH-USDT").await);

    tokio::time::timeout(Duration::from_secs(10), async {
        let listener = TcpListener::bind(addr).await.unwrap();
        let mut ws = accept(&listener).await;
        assert_eq!(next_text(&mut ws).await, "sub:ETH-USDT");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    })
    .await
    .expect("reconnect scenario timed out");

    assert!(metrics.reconnects.with_label_values(&["local"]).get() >= 1);
}

#[tokio::test]
async fn test_idle_connection_sends_keepalives_on_interval() {
    let settings = SupervisorSettings {
        keepalive_interval: Duration::from_millis(100),
        ..QUIET
    };
    let metrics = idle_keepalives(settings, 3).await;
    assert_eq!(metrics.reconnects.with_label_values(&["local"]).get(), 0);
}

#[tokio::test]
async fn test_receive_timeout_sends_keepalive_and_stays_connected() {
    let settings = SupervisorSettings {
        receive_timeout: Duration::from_millis(300),
        ..QUIET
    };
    // The interval is a minute away, so these pings come from the timeout.
    let metrics = idle_keepalives(settings, 3).await;
    assert_eq!(metrics.reconnects.with_label_values(&["local"]).get(), 0);
}
