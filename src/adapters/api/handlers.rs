//! HTTP API Handlers
//!
//! Thin translations between JSON bodies and `Tracker` commands. The
//! tracker does all validation; handlers only check that the required
//! fields are present.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::domain::{price_key, AlertView, EnableOptions, TrackerError};
use crate::usecases::{NewAlert, PriceView};

use super::types::{
  required, AlertKeyRequest, AlertPatchRequest, AlertRequest, ApiError, ApiJson, DerivedRequest,
  HistoryPoint, MessageResponse, TickerRequest,
};
use super::ApiState;

type Created = (StatusCode, Json<MessageResponse>);

/// `GET /api/current_price`
pub async fn current_prices(State(state): State<ApiState>) -> Json<BTreeMap<String, PriceView>> {
  Json(state.tracker.current_prices(true))
}

/// `GET /api/prices`: recorded changes of every subscribed and derived
/// instrument over the history window, oldest first.
pub async fn price_history(
  State(state): State<ApiState>,
) -> Result<Json<BTreeMap<String, Vec<HistoryPoint>>>, ApiError> {
  let mut result = BTreeMap::new();
  let Some(history) = &state.history else {
    return Ok(Json(result));
  };
  let since = state.clock.now() - state.history_window_secs;

  for (source, instruments) in state.tracker.instruments().await {
    for instrument in instruments {
      let changes = history
        .recent(&source, &instrument, since, state.history_limit)
        .await?;
      let points = changes
        .into_iter()
        .map(|c| HistoryPoint {
          price: c.price,
          timestamp: c.timestamp,
        })
        .collect();
      result.insert(price_key(&source, &instrument), points);
    }
  }
  Ok(Json(result))
}

/// `GET /api/tickers`
pub async fn list_tickers(State(state): State<ApiState>) -> Json<BTreeMap<String, Vec<String>>> {
  Json(state.tracker.instruments().await)
}

/// `POST /api/tickers`
pub async fn add_ticker(
  State(state): State<ApiState>,
  ApiJson(req): ApiJson<TickerRequest>,
) -> Result<Created, ApiError> {
  let exchange = required(req.exchange, "exchange")?;
  let symbol = required(req.symbol, "symbol")?;
  let added = state.tracker.add_subscription(&exchange, &symbol).await?;
  let message = if added {
    format!("Ticker {exchange}_{symbol} added successfully")
  } else {
    format!("Ticker {exchange}_{symbol} already subscribed")
  };
  Ok((StatusCode::CREATED, MessageResponse::json(message)))
}

/// `DELETE /api/tickers`
pub async fn remove_ticker(
  State(state): State<ApiState>,
  ApiJson(req): ApiJson<TickerRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
  let exchange = required(req.exchange, "exchange")?;
  let symbol = required(req.symbol, "symbol")?;
  state.tracker.remove_subscription(&exchange, &symbol).await?;
  Ok(MessageResponse::json(format!("Ticker {exchange}_{symbol} removed successfully")))
}

/// `GET /api/calculated_tickers`: name -> formula.
pub async fn list_derived(State(state): State<ApiState>) -> Json<BTreeMap<String, String>> {
  let formulas = state
    .tracker
    .derived_formulas()
    .await
    .into_iter()
    .map(|view| (view.name, view.formula))
    .collect();
  Json(formulas)
}

/// `POST /api/calculated_tickers`
pub async fn add_derived(
  State(state): State<ApiState>,
  ApiJson(req): ApiJson<DerivedRequest>,
) -> Result<Created, ApiError> {
  let name = required(req.name, "name")?;
  let formula = required(req.formula, "formula")?;
  state.tracker.add_derived(&name, &formula).await?;
  Ok((
    StatusCode::CREATED,
    MessageResponse::json(format!("Calculated ticker {name} added successfully")),
  ))
}

/// `DELETE /api/calculated_tickers`
pub async fn remove_derived(
  State(state): State<ApiState>,
  ApiJson(req): ApiJson<DerivedRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
  let name = required(req.name, "name")?;
  state.tracker.remove_derived(&name).await?;
  Ok(MessageResponse::json(format!("Calculated ticker {name} removed successfully")))
}

/// `GET /api/alerts`
pub async fn list_alerts(State(state): State<ApiState>) -> Json<Vec<AlertView>> {
  Json(state.tracker.alerts().await)
}

/// `POST /api/alerts`
pub async fn add_alert(
  State(state): State<ApiState>,
  ApiJson(req): ApiJson<AlertRequest>,
) -> Result<Created, ApiError> {
  let ticker = required(req.ticker, "ticker")?;
  let alert = NewAlert {
    instrument: ticker.clone(),
    condition: required(req.condition, "condition")?,
    message: required(req.message, "message")?,
    min_interval_secs: req.min_interval.unwrap_or_default(),
    max_activations: req.max_activations,
  };
  state.tracker.add_alert(alert).await?;
  Ok((
    StatusCode::CREATED,
    MessageResponse::json(format!("Alert for {ticker} added successfully")),
  ))
}

/// `DELETE /api/alerts`
pub async fn remove_alert(
  State(state): State<ApiState>,
  ApiJson(req): ApiJson<AlertKeyRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
  let ticker = required(req.ticker, "ticker")?;
  let condition = required(req.condition, "condition")?;
  state.tracker.remove_alert(&ticker, &condition).await?;
  Ok(MessageResponse::json(format!("Alert for {ticker} removed successfully")))
}

/// `PATCH /api/alerts`: enable (optionally resetting or re-capping) or disable.
pub async fn patch_alert(
  State(state): State<ApiState>,
  ApiJson(req): ApiJson<AlertPatchRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
  let ticker = required(req.ticker, "ticker")?;
  let condition = required(req.condition, "condition")?;
  let enabled = req
    .enabled
    .ok_or(ApiError::Tracker(TrackerError::MissingField("enabled")))?;

  if enabled {
    let options = EnableOptions {
      reset: req.reset,
      max_activations: req.max_activations,
    };
    state.tracker.enable_alert(&ticker, &condition, options).await?;
  } else {
    state.tracker.disable_alert(&ticker, &condition).await?;
  }

  let status = if enabled { "enabled" } else { "disabled" };
  Ok(MessageResponse::json(format!("Alert for {ticker} {status} successfully")))
}
