//! HTTP API Request/Response Types
//!
//! Request bodies keep every field optional so a missing field is
//! reported as a 400 with a readable message instead of an extractor
//! rejection. Field names follow the public JSON API (`exchange`,
//! `symbol`, `ticker`, `min_interval`).

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::domain::TrackerError;

/// `POST` / `DELETE /api/tickers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerRequest {
  #[serde(alias = "source")]
  pub exchange: Option<String>,
  #[serde(alias = "instrument")]
  pub symbol: Option<String>,
}

/// `POST` / `DELETE /api/calculated_tickers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DerivedRequest {
  pub name: Option<String>,
  pub formula: Option<String>,
}

/// `POST /api/alerts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertRequest {
  pub ticker: Option<String>,
  pub condition: Option<String>,
  pub message: Option<String>,
  /// Seconds between two activations.
  pub min_interval: Option<u64>,
  pub max_activations: Option<u32>,
}

/// `DELETE /api/alerts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertKeyRequest {
  pub ticker: Option<String>,
  pub condition: Option<String>,
}

/// `PATCH /api/alerts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertPatchRequest {
  pub ticker: Option<String>,
  pub condition: Option<String>,
  pub enabled: Option<bool>,
  /// Zero the activation count when enabling.
  #[serde(default)]
  pub reset: bool,
  /// Replace the activation cap when enabling.
  pub max_activations: Option<u32>,
}

/// One point of `GET /api/prices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
  pub price: f64,
  pub timestamp: i64,
}

/// Success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
  pub message: String,
}

impl MessageResponse {
  pub fn json(message: impl Into<String>) -> Json<Self> {
    Json(Self {
      message: message.into(),
    })
  }
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
  pub error: String,
}

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
  /// Rejected command: 404 when it addressed something missing, 400 otherwise.
  Tracker(TrackerError),
  /// Body missing, not JSON, or not the expected shape.
  Body(JsonRejection),
  Internal(anyhow::Error),
}

impl From<TrackerError> for ApiError {
  fn from(err: TrackerError) -> Self {
    Self::Tracker(err)
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    Self::Body(rejection)
  }
}

impl From<anyhow::Error> for ApiError {
  fn from(err: anyhow::Error) -> Self {
    Self::Internal(err)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      Self::Tracker(err) if err.is_not_found() => (StatusCode::NOT_FOUND, err.to_string()),
      Self::Tracker(err) => (StatusCode::BAD_REQUEST, err.to_string()),
      Self::Body(rejection) => (StatusCode::BAD_REQUEST, rejection.body_text()),
      Self::Internal(err) => {
        error!(error = %err, "API request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
      }
    };
    (status, Json(ErrorResponse { error: message })).into_response()
  }
}

/// `Json` extractor whose rejections use the `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
  T: DeserializeOwned,
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
    let Json(value) = Json::<T>::from_request(req, state).await?;
    Ok(Self(value))
  }
}

/// Unwrap a required request field.
pub fn required(value: Option<String>, field: &'static str) -> Result<String, ApiError> {
  value
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
    .ok_or(ApiError::Tracker(TrackerError::MissingField(field)))
}
