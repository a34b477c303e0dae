//! Instrument keys and price samples.
//!
//! Every key that enters the price cache, a formula, or an alert rule goes
//! through [`canonicalize`] first. Keys are case-insensitive and the
//! separator characters `, . ! : -` all collapse to `_`, so
//! `KuCoin_BTC-USDT`, `kucoin_btc.usdt` and `kucoin_btc_usdt` are the same
//! instrument.

use serde::{Deserialize, Serialize};

/// Characters that collapse to [`CANONICAL_SEPARATOR`].
pub const SEPARATORS: [char; 5] = [',', '.', '!', ':', '-'];

/// Separator used in every canonical key.
pub const CANONICAL_SEPARATOR: char = '_';

/// Source name under which derived instruments are published.
pub const CALCULATED_SOURCE: &str = "Calculated";

/// Returns `true` if `c` collapses to the canonical separator.
pub fn is_separator(c: char) -> bool {
    SEPARATORS.contains(&c)
}

/// Canonical form of an instrument key.
pub fn canonicalize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if is_separator(c) {
                CANONICAL_SEPARATOR
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

/// Cache key for an instrument of a given source.
pub fn price_key(source: &str, instrument: &str) -> String {
    canonicalize(&format!("{source}{CANONICAL_SEPARATOR}{instrument}"))
}

/// Cache key for a derived instrument.
pub fn derived_key(name: &str) -> String {
    price_key(CALCULATED_SOURCE, name)
}

/// One observed price for a (source, instrument) pair.
///
/// Samples are never mutated; a newer sample for the same key replaces the
/// older one in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Source name as configured (e.g. "kucoin", "Calculated").
    pub source: String,
    /// Instrument symbol as the source spells it (e.g. "BTC-USDT").
    pub instrument: String,
    /// Receive time, Unix seconds.
    pub timestamp: i64,
    /// Last traded price.
    pub price: f64,
}

impl PriceSample {
    pub fn new(source: impl Into<String>, instrument: impl Into<String>, timestamp: i64, price: f64) -> Self {
        Self {
            source: source.into(),
            instrument: instrument.into(),
            timestamp,
            price,
        }
    }

    /// Canonical cache key of this sample.
    pub fn key(&self) -> String {
        price_key(&self.source, &self.instrument)
    }
}
