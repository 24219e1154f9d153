use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
  analytics::{cashflow_buckets::aggregate_counterparty, RiskSeries},
  market::RISK_TERMS,
  midwares::app_state::{AppError, AppState},
  store::{PageQuery, SOFR_CURVE_ID},
};

pub async fn health() -> Json<Value> {
  Json(json!({"status": "ok", "code": 200}))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapsParams {
  page: Option<u32>,
  page_size: Option<u32>,
  sort_field: Option<String>,
  sort_order: Option<String>,
}

pub async fn list_swaps(State(state): State<AppState>, Query(p): Query<SwapsParams>) -> Result<Json<Value>, AppError> {
  let query = PageQuery::parse(p.page, p.page_size, p.sort_field.as_deref(), p.sort_order.as_deref())?;
  let total = state.store.count_swaps().await?;
  let rows = state.store.list_swaps(&query).await?;
  debug!(page = query.page, page_size = query.page_size, rows = rows.len(), "swaps page");
  Ok(Json(json!({"total": total, "rows": rows})))
}

pub async fn swap_by_id(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
  let resp = match state.store.swap_by_id(&id).await? {
    Some(swap) => Json(json!({"swap": swap})).into_response(),
    None => (StatusCode::NOT_FOUND, Json(json!({"swap": null}))).into_response(),
  };
  Ok(resp)
}

pub async fn risk_by_id(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
  let rows = state.store.risk_by_id(&id).await?;
  Ok(Json(json!({"rows": rows})))
}

#[derive(Debug, Default, Deserialize)]
pub struct RiskBatchParams {
  ids: Option<String>,
}

pub async fn risk_batch(State(state): State<AppState>, Query(p): Query<RiskBatchParams>) -> Result<Json<Value>, AppError> {
  let ids: Vec<String> = p
    .ids
    .as_deref()
    .unwrap_or_default()
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect();
  if ids.is_empty() {
    return Ok(Json(json!({"rows": []})));
  }
  let rows = state.store.risk_by_ids(&ids).await?;
  Ok(Json(json!({"rows": rows})))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainAggParams {
  id: Option<String>,
  row_type: Option<String>,
}

pub async fn main_agg(State(state): State<AppState>, Query(p): Query<MainAggParams>) -> Result<Json<Value>, AppError> {
  let (Some(id), Some(row_type)) = (p.id.filter(|s| !s.is_empty()), p.row_type.filter(|s| !s.is_empty())) else {
    return Err(AppError::BadRequest("id and rowType are required".to_string()));
  };
  let row = state.store.main_agg(&id, &row_type).await?;
  Ok(Json(json!({"row": row})))
}

pub async fn latest_market_data(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
  let snapshot = state
    .store
    .latest_market_data(SOFR_CURVE_ID)
    .await?
    .ok_or_else(|| AppError::NotFound("no market data".to_string()))?;
  Ok(Json(json!({"quote_time": snapshot.quote_time, "rows": snapshot.rows})))
}

pub async fn latest_calibration(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
  let record = state
    .store
    .latest_calibration(SOFR_CURVE_ID)
    .await?
    .ok_or_else(|| AppError::NotFound("no calibration".to_string()))?;
  Ok(Json(json!({"timestamp": record.timestamp, "json": record.json})))
}

#[derive(Debug, Default, Deserialize)]
pub struct FixingsParams {
  index: Option<String>,
  start: Option<String>,
  end: Option<String>,
}

fn parse_date(name: &str, value: &str) -> Result<NaiveDate, AppError> {
  NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
    .map_err(|_| AppError::BadRequest(format!("{} must be YYYY-MM-DD, got {:?}", name, value)))
}

pub async fn fixings(State(state): State<AppState>, Query(p): Query<FixingsParams>) -> Result<Json<Value>, AppError> {
  let (Some(index), Some(start), Some(end)) = (p.index, p.start, p.end) else {
    return Err(AppError::BadRequest("index, start and end are required".to_string()));
  };
  let (start, end) = (parse_date("start", &start)?, parse_date("end", &end)?);
  let rows = state.store.fixings(&index, start, end).await?;
  Ok(Json(json!({"rows": rows})))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterpartyParams {
  counterparty_id: Option<String>,
  id: Option<String>,
}

pub async fn counterparty_cashflows(
  State(state): State<AppState>,
  Query(p): Query<CounterpartyParams>,
) -> Result<Json<Value>, AppError> {
  let Some(cp) = p.counterparty_id.or(p.id).filter(|s| !s.is_empty()) else {
    return Err(AppError::BadRequest("counterpartyId is required".to_string()));
  };
  let today = state.config.valuation_date.unwrap_or_else(|| Utc::now().date_naive());
  let cashflows = state.store.counterparty_cashflows(&cp, today).await?;
  let risk = state.store.counterparty_cashflow_risk(&cp, today).await?;
  let buckets = aggregate_counterparty(&cashflows, &risk, today);
  Ok(Json(json!({"buckets": buckets})))
}

pub async fn risk_series(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<RiskSeries>, AppError> {
  let row = state
    .store
    .risk_by_id(&id)
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| AppError::NotFound(format!("no risk row for {}", id)))?;
  let series = RiskSeries::from_values(RISK_TERMS.iter().copied().zip(row.deltas.iter().copied()));
  Ok(Json(series))
}
