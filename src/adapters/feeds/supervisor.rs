//! Feed Supervisor - Connection Lifecycle for One Source
//!
//! Drives a `FeedConnector` through
//! `Disconnected -> Connecting -> Connected -> Disconnected` forever:
//! fixed reconnect delay, no backoff, no retry cap. Every successful
//! connect re-subscribes the whole intent set. Subscription commands are
//! processed in every state, including during the reconnect delay.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::FeedsConfig;
use crate::domain::{canonicalize, price_key, FeedError, PriceSample};
use crate::ports::{Clock, ConnectionState, FeedCommand, FeedConnector, FeedHandle, Quote};
use crate::usecases::PriceCache;

/// Timing knobs of the connection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Wait between a transport failure and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Longest wait for a frame before a keepalive is forced. Also bounds
    /// the connect handshake.
    pub receive_timeout: Duration,
    /// Keepalive period while connected.
    pub keepalive_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(20),
        }
    }
}

impl From<&FeedsConfig> for SupervisorSettings {
    fn from(config: &FeedsConfig) -> Self {
        Self {
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            receive_timeout: Duration::from_secs(config.receive_timeout_secs),
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
        }
    }
}

/// Owns one source's transport, intent set and write path into the cache.
pub struct FeedSupervisor<C: FeedConnector> {
    /// Source-specific protocol.
    connector: Arc<C>,
    /// Shared price cache (this task is the only writer for its source).
    cache: Arc<PriceCache>,
    /// Time source for sample timestamps.
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    settings: SupervisorSettings,
    /// Commands from the `FeedHandle`.
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    /// Published connection state.
    state_tx: watch::Sender<ConnectionState>,
    /// Canonical instrument -> instrument as requested.
    intent: BTreeMap<String, String>,
}

impl<C: FeedConnector> FeedSupervisor<C> {
    /// Create a supervisor and the handle that controls it.
    pub fn new(
        connector: C,
        cache: Arc<PriceCache>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
        settings: SupervisorSettings,
    ) -> (Self, FeedHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let handle = FeedHandle::new(connector.source(), command_tx, state_rx);

        metrics
            .feed_connected
            .with_label_values(&[connector.source()])
            .set(0.0);

        let supervisor = Self {
            connector: Arc::new(connector),
            cache,
            clock,
            metrics,
            settings,
            commands,
            state_tx,
            intent: BTreeMap::new(),
        };
        (supervisor, handle)
    }

    /// Run the supervisor on its own task.
    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }

    fn source(&self) -> &str {
        self.connector.source()
    }

    /// Connection loop. Returns only on shutdown.
    #[instrument(skip(self, shutdown_rx), fields(source = %self.connector.source()))]
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            self.set_state(ConnectionState::Connecting);

            match self.connect_and_stream(&mut shutdown_rx).await {
                Ok(()) => {
                    self.set_state(ConnectionState::Disconnected);
                    info!("Feed shut down gracefully");
                    return;
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    self.metrics
                        .reconnects
                        .with_label_values(&[self.connector.source()])
                        .inc();
                    warn!(
                        error = %e,
                        delay_ms = self.settings.reconnect_delay.as_millis(),
                        "Feed disconnected, reconnecting"
                    );
                    if self.wait_reconnect_delay(&mut shutdown_rx).await {
                        self.set_state(ConnectionState::Disconnected);
                        info!("Feed shut down during reconnect delay");
                        return;
                    }
                }
            }
        }
    }

    /// Sleep through the reconnect delay while still applying commands.
    /// Returns `true` if shutdown was requested.
    async fn wait_reconnect_delay(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let delay = tokio::time::sleep(self.settings.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply_command(command, None::<&mut NoSink>).await,
                    None => return true,
                },
                () = &mut delay => return false,
            }
        }
    }

    /// One connection session: handshake, connect, resubscribe, stream.
    /// `Ok(())` means shutdown; any error means reconnect.
    async fn connect_and_stream(
        &mut self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), FeedError> {
        let establish = async {
            let url = self.connector.connect().await?;
            debug!(url = %url, "Opening feed transport");
            let (ws_stream, _) = connect_async(url.as_str()).await?;
            Ok::<_, FeedError>(ws_stream)
        };

        let ws_stream = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return Ok(()),
            result = timeout(self.settings.receive_timeout, establish) => {
                result.map_err(|_| FeedError::Transport("connect timed out".to_string()))??
            }
        };

        let (mut write, mut read) = ws_stream.split();
        self.set_state(ConnectionState::Connected);
        info!(instruments = self.intent.len(), "Feed connected");

        let instruments: Vec<String> = self.intent.values().cloned().collect();
        if !instruments.is_empty() {
            let frames = self.connector.subscribe_messages(&instruments);
            send_frames(&mut write, frames, self.source()).await;
        }

        let period = self.settings.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.apply_command(command, Some(&mut write)).await,
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },
                _ = keepalive.tick() => {
                    let frame = self.connector.keepalive_message();
                    send_frames(&mut write, vec![frame], self.source()).await;
                }
                received = timeout(self.settings.receive_timeout, read.next()) => match received {
                    Err(_) => {
                        debug!("Receive timed out, sending keepalive");
                        let frame = self.connector.keepalive_message();
                        send_frames(&mut write, vec![frame], self.source()).await;
                    }
                    Ok(Some(Ok(Message::Text(text)))) => self.handle_text(&text),
                    Ok(Some(Ok(Message::Binary(bytes)))) => match String::from_utf8(bytes) {
                        Ok(text) => self.handle_text(&text),
                        Err(_) => {
                            self.count_parse_error();
                            debug!("Dropping non UTF-8 binary frame");
                        }
                    },
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        // tungstenite queues the pong reply itself
                        debug!(len = payload.len(), "Ping received");
                    }
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        return Err(FeedError::Transport(format!("closed by peer: {frame:?}")));
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => return Err(e.into()),
                    Ok(None) => return Err(FeedError::Transport("stream ended".to_string())),
                },
            }
        }
    }

    /// Apply a subscription change to the intent set, and to the open
    /// transport when there is one.
    async fn apply_command<S>(&mut self, command: FeedCommand, write: Option<&mut S>)
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
    {
        match command {
            FeedCommand::Subscribe(instrument) => {
                let key = canonicalize(&instrument);
                if self.intent.contains_key(&key) {
                    debug!(instrument = %instrument, "Already subscribed");
                    return;
                }
                self.intent.insert(key, instrument.clone());
                info!(instrument = %instrument, "Subscribed");
                if let Some(write) = write {
                    let frames = self.connector.subscribe_messages(&[instrument]);
                    send_frames(write, frames, self.connector.source()).await;
                }
            }
            FeedCommand::Unsubscribe(instrument) => {
                let Some(removed) = self.intent.remove(&canonicalize(&instrument)) else {
                    debug!(instrument = %instrument, "Not subscribed");
                    return;
                };
                self.cache.remove(&price_key(self.connector.source(), &removed));
                info!(instrument = %removed, "Unsubscribed");
                if let Some(write) = write {
                    let frames = self.connector.unsubscribe_messages(&[removed]);
                    send_frames(write, frames, self.connector.source()).await;
                }
            }
        }
    }

    /// Parse a text frame and write the quote into the cache.
    fn handle_text(&self, text: &str) {
        match self.connector.parse_message(text) {
            Ok(Some(quote)) => self.accept_quote(quote),
            Ok(None) => {}
            Err(e) => {
                self.count_parse_error();
                debug!(error = %e, "Dropping unparseable frame");
            }
        }
    }

    fn accept_quote(&self, quote: Quote) {
        if !quote.price.is_finite() {
            self.count_parse_error();
            debug!(instrument = %quote.instrument, "Dropping non-finite price");
            return;
        }
        let Some(instrument) = self.intent.get(&canonicalize(&quote.instrument)) else {
            debug!(instrument = %quote.instrument, "Dropping quote for unsubscribed instrument");
            return;
        };

        self.cache.put(PriceSample::new(
            self.source(),
            instrument.clone(),
            self.clock.now(),
            quote.price,
        ));
        self.metrics
            .price_updates
            .with_label_values(&[self.source()])
            .inc();
    }

    fn count_parse_error(&self) {
        self.metrics
            .parse_errors
            .with_label_values(&[self.source()])
            .inc();
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        let connected = if state == ConnectionState::Connected { 1.0 } else { 0.0 };
        self.metrics
            .feed_connected
            .with_label_values(&[self.source()])
            .set(connected);
    }
}

/// Stand-in sink type for commands applied while disconnected.
type NoSink = futures_util::sink::Drain<Message>;

/// Send frames in order. Failures are logged; a broken transport is
/// detected by the read side.
async fn send_frames<S>(write: &mut S, frames: Vec<String>, source: &str)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    for frame in frames {
        if let Err(e) = write.send(Message::Text(frame)).await {
            warn!(source, error = %e, "Failed to send frame");
        }
    }
}
