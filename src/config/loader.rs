//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.
//! Formula and condition validation happens later, when the
//! tracker registers them.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Known upstream sources.
pub const SOURCES: [&str; 3] = ["kucoin", "gateio", "mexc"];

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    subscriptions = config.subscriptions.len(),
    derived = config.derived.len(),
    alerts = config.alerts.len(),
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive timing values
/// - Known source names and non-empty instruments
/// - Complete derived and alert definitions
pub fn validate_config(config: &AppConfig) -> Result<()> {
  // Timing
  anyhow::ensure!(
    config.feeds.reconnect_delay_secs > 0,
    "feeds.reconnect_delay_secs must be positive"
  );
  anyhow::ensure!(
    config.feeds.receive_timeout_secs > 0,
    "feeds.receive_timeout_secs must be positive"
  );
  anyhow::ensure!(
    config.feeds.keepalive_interval_secs > 0,
    "feeds.keepalive_interval_secs must be positive"
  );
  anyhow::ensure!(
    config.engine.tick_interval_ms > 0,
    "engine.tick_interval_ms must be positive"
  );

  // Subscriptions
  for (i, sub) in config.subscriptions.iter().enumerate() {
    let source = sub.source.to_ascii_lowercase();
    anyhow::ensure!(
      SOURCES.contains(&source.as_str()),
      "Subscription {} has unknown source '{}' (expected one of {:?})",
      i,
      sub.source,
      SOURCES
    );
    anyhow::ensure!(
      !sub.instrument.trim().is_empty(),
      "Subscription {} ({}) has empty instrument",
      i,
      sub.source
    );
  }

  // Derived instruments
  for (i, derived) in config.derived.iter().enumerate() {
    anyhow::ensure!(
      !derived.name.trim().is_empty(),
      "Derived instrument {} has empty name",
      i
    );
    anyhow::ensure!(
      !derived.formula.trim().is_empty(),
      "Derived instrument {} ({}) has empty formula",
      i,
      derived.name
    );
  }

  // Alerts
  for (i, alert) in config.alerts.iter().enumerate() {
    anyhow::ensure!(
      !alert.instrument.trim().is_empty(),
      "Alert {} has empty instrument",
      i
    );
    anyhow::ensure!(
      !alert.condition.trim().is_empty(),
      "Alert {} ({}) has empty condition",
      i,
      alert.instrument
    );
    anyhow::ensure!(
      !alert.message.trim().is_empty(),
      "Alert {} ({}) has empty message",
      i,
      alert.instrument
    );
  }

  // API
  anyhow::ensure!(
    config.api.requests_per_minute > 0,
    "api.requests_per_minute must be positive"
  );
  anyhow::ensure!(
    config.persistence.history_limit > 0,
    "persistence.history_limit must be positive"
  );

  Ok(())
}
