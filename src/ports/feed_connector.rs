//! Feed Connector Port - Per-Source Streaming Protocol
//!
//! Captures everything that differs between upstream exchanges: the
//! connection handshake, subscription frames, frame parsing and the
//! keepalive payload. The reconnect / keepalive / command loop is shared
//! by every source (`adapters::feeds::supervisor`), so a connector never
//! touches the transport or the price cache directly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, RwLock};

use crate::domain::{canonicalize, FeedError};

/// A price extracted from one incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
  /// Instrument as the source spells it (e.g. "BTC-USDT").
  pub instrument: String,
  /// Last price.
  pub price: f64,
}

impl Quote {
  pub fn new(instrument: impl Into<String>, price: f64) -> Self {
    Self {
      instrument: instrument.into(),
      price,
    }
  }
}

/// Source-specific half of a streaming price feed.
///
/// Implementors are stateless with respect to the connection: the
/// supervisor owns the transport and the subscription intent set.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
  /// Source name used in cache keys and logs (e.g. "kucoin").
  fn source(&self) -> &str;

  /// Perform any handshake needed before the transport opens and return
  /// the WebSocket endpoint to dial.
  async fn connect(&self) -> Result<String, FeedError>;

  /// Frames that subscribe the open transport to `instruments`.
  fn subscribe_messages(&self, instruments: &[String]) -> Vec<String>;

  /// Frames that cancel a subscription. Sources without an unsubscribe
  /// operation simply stop receiving cache writes for the instrument.
  fn unsubscribe_messages(&self, _instruments: &[String]) -> Vec<String> {
    Vec::new()
  }

  /// Parse one text frame. `Ok(None)` for acknowledgements, pongs and
  /// other frames that carry no price.
  fn parse_message(&self, raw: &str) -> Result<Option<Quote>, FeedError>;

  /// Payload sent periodically to keep an idle transport open.
  fn keepalive_message(&self) -> String;
}

/// Connection lifecycle of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
  #[default]
  Disconnected,
  Connecting,
  Connected,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Disconnected => "disconnected",
      Self::Connecting => "connecting",
      Self::Connected => "connected",
    };
    f.write_str(name)
  }
}

/// Subscription change addressed to the supervisor owning a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
  Subscribe(String),
  Unsubscribe(String),
}

/// Control handle for one running feed.
///
/// The handle is the only issuer of subscription commands for its source.
/// It mirrors the intent set so queries never wait on the supervisor task,
/// which may be sleeping through a reconnect delay.
#[derive(Debug, Clone)]
pub struct FeedHandle {
  /// Source name (e.g. "kucoin").
  source: String,
  /// Command channel into the supervisor loop.
  commands: mpsc::UnboundedSender<FeedCommand>,
  /// Canonical instrument -> instrument as requested.
  requested: Arc<RwLock<BTreeMap<String, String>>>,
  /// Connection state published by the supervisor.
  state: watch::Receiver<ConnectionState>,
}

impl FeedHandle {
  pub fn new(
    source: impl Into<String>,
    commands: mpsc::UnboundedSender<FeedCommand>,
    state: watch::Receiver<ConnectionState>,
  ) -> Self {
    Self {
      source: source.into(),
      commands,
      requested: Arc::new(RwLock::new(BTreeMap::new())),
      state,
    }
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  /// Add an instrument to the intent set. Returns `false` if it was
  /// already requested (the command is idempotent).
  pub async fn subscribe(&self, instrument: &str) -> bool {
    let mut requested = self.requested.write().await;
    let key = canonicalize(instrument);
    if requested.contains_key(&key) {
      return false;
    }
    requested.insert(key, instrument.to_string());
    // A closed channel means the supervisor is gone; the intent set
    // still records the request.
    let _ = self
      .commands
      .send(FeedCommand::Subscribe(instrument.to_string()));
    true
  }

  /// Drop an instrument from the intent set. Returns the instrument as
  /// it was originally requested, or `None` if it was never requested.
  pub async fn unsubscribe(&self, instrument: &str) -> Option<String> {
    let mut requested = self.requested.write().await;
    let removed = requested.remove(&canonicalize(instrument))?;
    let _ = self
      .commands
      .send(FeedCommand::Unsubscribe(removed.clone()));
    Some(removed)
  }

  /// Instruments currently requested, as originally spelled.
  pub async fn instruments(&self) -> Vec<String> {
    self.requested.read().await.values().cloned().collect()
  }

  /// Whether `instrument` is in the intent set (canonical comparison).
  pub async fn is_subscribed(&self, instrument: &str) -> bool {
    self
      .requested
      .read()
      .await
      .contains_key(&canonicalize(instrument))
  }

  pub fn state(&self) -> ConnectionState {
    *self.state.borrow()
  }

  /// Watch receiver for state transitions.
  pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
    self.state.clone()
  }
}
