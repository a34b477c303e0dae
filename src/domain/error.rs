//! Error taxonomy shared by the domain, ports and use cases.
//!
//! - `FeedError`: transport drops and malformed frames (retried / dropped)
//! - `ValidationError`, `EvaluationError`: see `domain::expression`
//! - `TrackerError`: configuration commands rejected synchronously
//! - `NotificationError`: failed delivery, logged and never rolled back

use thiserror::Error;

use super::expression::ValidationError;

/// Errors raised by a feed connection.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection drop, send failure or stream end. Always retried.
    #[error("transport error: {0}")]
    Transport(String),
    /// Source-specific handshake (e.g. token fetch) failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Incoming frame could not be understood. The frame is dropped.
    #[error("unparseable frame: {0}")]
    Parse(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Handshake(err.to_string())
    }
}

/// Configuration command rejected by the tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("instrument {instrument} is not subscribed on {exchange}")]
    UnknownInstrument { exchange: String, instrument: String },
    #[error("unknown instrument key: {0}")]
    UnknownKey(String),
    #[error("derived instrument {0} already exists")]
    DuplicateDerived(String),
    #[error("unknown derived instrument: {0}")]
    UnknownDerived(String),
    #[error("invalid formula for {name}: {error}")]
    InvalidFormula {
        name: String,
        #[source]
        error: ValidationError,
    },
    #[error("invalid condition for {key}: {error}")]
    InvalidCondition {
        key: String,
        #[source]
        error: ValidationError,
    },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("alert for {key} with condition `{condition}` already exists")]
    DuplicateAlert { key: String, condition: String },
    #[error("no alert for {key} with condition `{condition}`")]
    AlertNotFound { key: String, condition: String },
}

impl TrackerError {
    /// Whether the command addressed something that does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UnknownInstrument { .. } | Self::UnknownDerived(_) | Self::AlertNotFound { .. }
        )
    }
}

/// Notification delivery failure.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}
