//! Configuration Module - TOML-based Tracker Configuration
//!
//! Loads and validates configuration from `config.toml` with
//! secrets taken from the environment (optionally via `.env`).
//! Every section has defaults so a minimal file only lists the
//! subscriptions, derived instruments and alerts to start with.

pub mod loader;

use serde::Deserialize;

/// Top-level tracker configuration.
///
/// Loaded once at startup. Subscriptions, derived instruments and
/// alerts listed here are registered before the HTTP surface opens;
/// any of them failing validation aborts startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Process identity and logging.
  pub tracker: TrackerConfig,
  /// Connection loop timing shared by every source.
  pub feeds: FeedsConfig,
  /// Periodic engine timing.
  pub engine: EngineConfig,
  /// Upstream endpoint overrides.
  pub endpoints: EndpointsConfig,
  /// Initial subscriptions.
  pub subscriptions: Vec<SubscriptionConfig>,
  /// Initial derived instruments, registered in order.
  pub derived: Vec<DerivedConfig>,
  /// Initial alert rules.
  pub alerts: Vec<AlertConfig>,
  /// Alert delivery.
  pub notifications: NotificationsConfig,
  /// Price history storage.
  pub persistence: PersistenceConfig,
  /// HTTP control surface.
  pub api: ApiConfig,
  /// Metrics and health endpoints.
  pub metrics: MetricsConfig,
}

/// Process identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
  /// Human-readable instance name.
  #[serde(default = "default_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      name: default_name(),
      log_level: default_log_level(),
    }
  }
}

/// Feed connection loop timing.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
  /// Fixed wait before reconnecting after a transport failure.
  #[serde(default = "default_reconnect_delay")]
  pub reconnect_delay_secs: u64,
  /// Receive wait before a keepalive is forced.
  #[serde(default = "default_receive_timeout")]
  pub receive_timeout_secs: u64,
  /// Keepalive period while connected.
  #[serde(default = "default_keepalive_interval")]
  pub keepalive_interval_secs: u64,
}

impl Default for FeedsConfig {
  fn default() -> Self {
    Self {
      reconnect_delay_secs: default_reconnect_delay(),
      receive_timeout_secs: default_receive_timeout(),
      keepalive_interval_secs: default_keepalive_interval(),
    }
  }
}

/// Periodic engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// Tick period of the derived registry, alert engine and recorder.
  #[serde(default = "default_tick_interval")]
  pub tick_interval_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      tick_interval_ms: default_tick_interval(),
    }
  }
}

/// Upstream endpoints. Overridable for testing against local servers.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
  /// KuCoin token endpoint (POST).
  #[serde(default = "default_kucoin_bullet_url")]
  pub kucoin_bullet_url: String,
  /// Gate.io spot WebSocket.
  #[serde(default = "default_gateio_ws_url")]
  pub gateio_ws_url: String,
  /// MEXC spot WebSocket.
  #[serde(default = "default_mexc_ws_url")]
  pub mexc_ws_url: String,
  /// HTTP timeout for handshakes (seconds).
  #[serde(default = "default_http_timeout")]
  pub http_timeout_secs: u64,
}

impl Default for EndpointsConfig {
  fn default() -> Self {
    Self {
      kucoin_bullet_url: default_kucoin_bullet_url(),
      gateio_ws_url: default_gateio_ws_url(),
      mexc_ws_url: default_mexc_ws_url(),
      http_timeout_secs: default_http_timeout(),
    }
  }
}

/// One initial subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
  /// Source name (kucoin, gateio, mexc).
  #[serde(alias = "exchange")]
  pub source: String,
  /// Instrument as the source spells it.
  #[serde(alias = "symbol")]
  pub instrument: String,
}

/// One initial derived instrument.
#[derive(Debug, Clone, Deserialize)]
pub struct DerivedConfig {
  pub name: String,
  pub formula: String,
}

/// One initial alert rule.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
  /// Instrument key, e.g. `mexc_BTCUSDT`.
  #[serde(alias = "ticker")]
  pub instrument: String,
  pub condition: String,
  pub message: String,
  #[serde(default, alias = "min_interval")]
  pub min_interval_secs: u64,
  #[serde(default)]
  pub max_activations: Option<u32>,
}

/// Alert delivery configuration.
///
/// Credentials come from `TELEGRAM_TOKEN` / `TELEGRAM_CHATID`; when
/// either is missing alerts are only logged.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
  /// Deliver alerts to Telegram when credentials are present.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Telegram Bot API base URL.
  #[serde(default = "default_telegram_api_url")]
  pub api_url: String,
  /// Request timeout (seconds).
  #[serde(default = "default_http_timeout")]
  pub timeout_secs: u64,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      api_url: default_telegram_api_url(),
      timeout_secs: default_http_timeout(),
    }
  }
}

/// Price history configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Record price changes.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Directory for JSONL price logs.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// Window served by the price history query (seconds).
  #[serde(default = "default_history_window")]
  pub history_window_secs: u64,
  /// Maximum records returned per history query.
  #[serde(default = "default_history_limit")]
  pub history_limit: usize,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      data_dir: default_data_dir(),
      history_window_secs: default_history_window(),
      history_limit: default_history_limit(),
    }
  }
}

/// HTTP control surface configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// API server bind address.
  #[serde(default = "default_api_addr")]
  pub bind_address: String,
  /// Requests accepted per minute across all clients.
  #[serde(default = "default_requests_per_minute")]
  pub requests_per_minute: u32,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_api_addr(),
      requests_per_minute: default_requests_per_minute(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_name() -> String {
  "price-tracker".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_reconnect_delay() -> u64 {
  5
}

fn default_receive_timeout() -> u64 {
  30
}

fn default_keepalive_interval() -> u64 {
  20
}

fn default_tick_interval() -> u64 {
  1000
}

fn default_kucoin_bullet_url() -> String {
  "https://api.kucoin.com/api/v1/bullet-public".to_string()
}

fn default_gateio_ws_url() -> String {
  "wss://api.gateio.ws/ws/v4/".to_string()
}

fn default_mexc_ws_url() -> String {
  "wss://wbs.mexc.com/ws".to_string()
}

fn default_http_timeout() -> u64 {
  10
}

fn default_telegram_api_url() -> String {
  "https://api.telegram.org".to_string()
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_history_window() -> u64 {
  120
}

fn default_history_limit() -> usize {
  1000
}

fn default_api_addr() -> String {
  "0.0.0.0:5000".to_string()
}

fn default_requests_per_minute() -> u32 {
  600
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
