//! Alert rules - trigger bookkeeping and message rendering.
//!
//! A rule fires when its condition holds, it is enabled, it is under its
//! activation cap and its minimum interval has elapsed since the previous
//! activation. Reaching the cap disables the rule instead of deleting it.

use serde::Serialize;

use super::expression::Expression;
use super::instrument::canonicalize;

/// Optional modifiers applied together with an enable command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnableOptions {
    /// Clear the activation counter.
    pub reset: bool,
    /// Replace the activation cap.
    pub max_activations: Option<u32>,
}

/// A registered alert rule.
#[derive(Debug, Clone)]
pub struct AlertRule {
    /// Canonical instrument key the rule watches.
    pub key: String,
    /// Boolean condition over `price`, `timestamp` and snapshot keys.
    pub condition: Expression,
    /// Message template (`{ticker}`, `{price}`, `{price:.4f}`, `{timestamp}`).
    pub message: String,
    /// Minimum seconds between two activations.
    pub min_interval_secs: u64,
    /// Unix seconds of the last activation.
    pub last_triggered: Option<i64>,
    /// Activations so far.
    pub activation_count: u32,
    /// Cap on activations; `None` means unlimited.
    pub max_activations: Option<u32>,
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(
        instrument: &str,
        condition: Expression,
        message: impl Into<String>,
        min_interval_secs: u64,
        max_activations: Option<u32>,
    ) -> Self {
        Self {
            key: canonicalize(instrument),
            condition,
            message: message.into(),
            min_interval_secs,
            last_triggered: None,
            activation_count: 0,
            max_activations,
            enabled: true,
        }
    }

    /// Whether this rule is addressed by `(instrument, condition)`.
    pub fn matches(&self, instrument: &str, condition: &str) -> bool {
        self.key == canonicalize(instrument) && self.condition.as_str() == condition.trim()
    }

    pub fn under_cap(&self) -> bool {
        self.max_activations.is_none_or(|max| self.activation_count < max)
    }

    pub fn interval_elapsed(&self, now: i64) -> bool {
        self.last_triggered.is_none_or(|last| {
            now.saturating_sub(last) >= i64::try_from(self.min_interval_secs).unwrap_or(i64::MAX)
        })
    }

    /// Everything except the condition itself.
    pub fn can_fire(&self, now: i64) -> bool {
        self.enabled && self.under_cap() && self.interval_elapsed(now)
    }

    /// Record an activation at `now`; disables the rule when the cap is hit.
    pub fn record_trigger(&mut self, now: i64) {
        self.activation_count = self.activation_count.saturating_add(1);
        self.last_triggered = Some(now);
        if !self.under_cap() {
            self.enabled = false;
        }
    }

    pub fn enable(&mut self, options: EnableOptions) {
        if let Some(max) = options.max_activations {
            self.max_activations = Some(max);
        }
        if options.reset {
            self.activation_count = 0;
        }
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Render the message template for an activation.
    pub fn render(&self, price: f64, timestamp: i64) -> String {
        render_template(&self.message, &self.key, price, timestamp)
    }

    /// Serializable view of the full rule state.
    pub fn view(&self) -> AlertView {
        AlertView {
            ticker: self.key.clone(),
            condition: self.condition.as_str().to_string(),
            message: self.message.clone(),
            min_interval: self.min_interval_secs,
            max_activations: self.max_activations,
            activation_count: self.activation_count,
            last_triggered: self.last_triggered,
            enabled: self.enabled,
        }
    }
}

/// Listing representation of an alert rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertView {
    pub ticker: String,
    pub condition: String,
    pub message: String,
    pub min_interval: u64,
    pub max_activations: Option<u32>,
    pub activation_count: u32,
    pub last_triggered: Option<i64>,
    pub enabled: bool,
}

/// Substitute `{ticker}`, `{price}`, `{price:.N}` / `{price:.Nf}` and
/// `{timestamp}`. `{{` and `}}` are literal braces; unknown placeholders are
/// kept verbatim.
pub fn render_template(template: &str, ticker: &str, price: f64, timestamp: i64) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(idx) = rest.find(['{', '}']) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let placeholder = &tail[1..end];
        match render_placeholder(placeholder, ticker, price, timestamp) {
            Some(rendered) => out.push_str(&rendered),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    out
}

fn render_placeholder(placeholder: &str, ticker: &str, price: f64, timestamp: i64) -> Option<String> {
    let (name, spec) = match placeholder.split_once(':') {
        Some((name, spec)) => (name.trim(), Some(spec.trim())),
        None => (placeholder.trim(), None),
    };

    match (name, spec) {
        ("ticker", None) => Some(ticker.to_string()),
        ("timestamp", None) => Some(timestamp.to_string()),
        ("price", None) => Some(price.to_string()),
        ("price", Some(spec)) => {
            let digits = spec.strip_prefix('.')?.trim_end_matches('f');
            let precision: usize = digits.parse().ok()?;
            Some(format!("{price:.precision$}"))
        }
        _ => None,
    }
}
