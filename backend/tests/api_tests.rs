use std::{
  sync::Arc,
  time::{SystemTime, UNIX_EPOCH},
};

use axum::{
  body::Body,
  http::{Request, StatusCode},
  Router,
};
use chrono::{NaiveDate, TimeZone, Utc};
use http_body_util::BodyExt;
use rates_backend::{
  config::{AppConfig, AuthConfig},
  market::{Curve, RISK_TERMS},
  midwares::{app_state::AppState, auth},
  route_handlers::build_router,
  store::{
    AggRecord, BlotterStore, CashflowRecord, CashflowRiskRecord, FixingRecord, MarketSnapshot, MemoryStore, RiskRecord,
    SwapRecord, SOFR_CURVE_ID,
  },
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn swap(id: &str, cp: &str, npv: f64) -> SwapRecord {
  SwapRecord {
    id: id.into(),
    row_type: Some("swap".into()),
    counterparty_id: Some(cp.into()),
    start_date: Some(d(2024, 1, 15)),
    termination_date: Some(d(2034, 1, 15)),
    fixed_rate: Some(4.0),
    npv: Some(npv),
    par_rate: Some(4.0),
    notional: Some(10_000_000),
    swap_type: Some("IRS".into()),
    pay_fixed: Some(true),
  }
}

fn deltas(pairs: &[(&str, f64)]) -> Vec<f64> {
  let mut out = vec![0.0; RISK_TERMS.len()];
  for (term, value) in pairs {
    out[RISK_TERMS.iter().position(|t| t == term).unwrap()] = *value;
  }
  out
}

async fn seeded_store() -> MemoryStore {
  let store = MemoryStore::new();
  store
    .insert_swaps(&[swap("S1", "CP1", 100.0), swap("S2", "CP1", 250.0), swap("S3", "CP2", -40.0)])
    .await
    .unwrap();
  store
    .insert_risk(&[
      RiskRecord { id: "S1".into(), row_type: None, deltas: deltas(&[("10Y", 5.0), ("2Y", -1.5)]), r: Some(4_000.0), z: None },
      RiskRecord { id: "S2".into(), row_type: None, deltas: deltas(&[("5Y", 3.0)]), r: None, z: None },
    ])
    .await
    .unwrap();
  store
    .insert_main_agg(&[AggRecord { row_type: "counterparty".into(), id: "CP1".into(), npv: Some(350.0) }])
    .await
    .unwrap();
  store
    .insert_fixings(&[
      FixingRecord { index_name: "SOFR".into(), date: d(2024, 5, 30), value: 5.31 },
      FixingRecord { index_name: "SOFR".into(), date: d(2024, 5, 31), value: 5.33 },
      FixingRecord { index_name: "SOFR".into(), date: d(2024, 6, 3), value: 5.32 },
    ])
    .await
    .unwrap();
  store
    .insert_cashflows(&[
      CashflowRecord { counterparty_id: "CP1".into(), payment_date: d(2024, 6, 12), total_cashflow: Some(1_000.0), total_weight: Some(0.5) },
      CashflowRecord { counterparty_id: "CP1".into(), payment_date: d(2024, 6, 14), total_cashflow: Some(500.0), total_weight: Some(0.25) },
      // already paid, falls outside the ladder
      CashflowRecord { counterparty_id: "CP1".into(), payment_date: d(2024, 5, 1), total_cashflow: Some(9.0), total_weight: None },
    ])
    .await
    .unwrap();
  store
    .insert_cashflow_risk(&[CashflowRiskRecord { counterparty_id: "CP1".into(), payment_date: d(2024, 6, 12), deltas: deltas(&[("1M", 2.0)]) }])
    .await
    .unwrap();
  store
}

fn config() -> AppConfig {
  AppConfig { valuation_date: Some(d(2024, 6, 3)), ..AppConfig::default() }
}

async fn app_with(store: MemoryStore, config: AppConfig) -> Router {
  build_router(AppState::new(Arc::new(store), config))
}

async fn app() -> Router {
  app_with(seeded_store().await, config()).await
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
  let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
  send(app, req).await
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
  let resp = app.oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes = resp.into_body().collect().await.unwrap().to_bytes();
  let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, body)
}

fn ids(rows: &Value) -> Vec<&str> {
  rows.as_array().unwrap().iter().map(|r| r["ID"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn health_is_ok() {
  let (status, body) = get(app().await, "/health").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn swaps_are_paged_and_sorted() {
  let (status, body) = get(app().await, "/api/swaps?page=0&pageSize=2&sortField=NPV&sortOrder=desc").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total"], json!(3));
  assert_eq!(ids(&body["rows"]), vec!["S2", "S1"]);

  let (_, body) = get(app().await, "/api/swaps?page=1&pageSize=2&sortField=NPV&sortOrder=desc").await;
  assert_eq!(ids(&body["rows"]), vec!["S3"]);

  let (_, body) = get(app().await, "/api/swaps").await;
  assert_eq!(ids(&body["rows"]), vec!["S1", "S2", "S3"]);
}

#[tokio::test]
async fn unknown_sort_field_is_a_bad_request() {
  let (status, body) = get(app().await, "/api/swaps?sortField=colour").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["code"], json!(400));
  assert!(body["error"].as_str().unwrap().contains("colour"));

  let (status, _) = get(app().await, "/api/swaps?sortOrder=sideways").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn swap_lookup() {
  let (status, body) = get(app().await, "/api/swap/S2").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["swap"]["NPV"], json!(250.0));
  assert_eq!(body["swap"]["CounterpartyID"], json!("CP1"));

  let (status, body) = get(app().await, "/api/swap/NOPE").await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body, json!({"swap": null}));
}

#[tokio::test]
async fn risk_rows_by_id_and_batch() {
  let (status, body) = get(app().await, "/api/risk/S1").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["rows"][0]["c_10Y"], json!(5.0));
  assert_eq!(body["rows"][0]["R"], json!(4000.0));

  let (_, body) = get(app().await, "/api/risk-batch").await;
  assert_eq!(body, json!({"rows": []}));

  let (_, body) = get(app().await, "/api/risk-batch?ids=S1,%20S2,,S9").await;
  let mut got = ids(&body["rows"]);
  got.sort();
  assert_eq!(got, vec!["S1", "S2"]);
}

#[tokio::test]
async fn main_agg_requires_both_keys() {
  let (status, _) = get(app().await, "/api/main-agg?id=CP1").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, body) = get(app().await, "/api/main-agg?id=CP1&rowType=counterparty").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["row"]["NPV"], json!(350.0));

  let (_, body) = get(app().await, "/api/main-agg?id=CP9&rowType=counterparty").await;
  assert_eq!(body["row"], Value::Null);
}

#[tokio::test]
async fn fixings_validate_their_range() {
  let (status, _) = get(app().await, "/api/fixings?index=SOFR&start=2024-05-30").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, body) = get(app().await, "/api/fixings?index=SOFR&start=30/05/2024&end=2024-06-03").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("start"));

  let (status, body) = get(app().await, "/api/fixings?index=SOFR&start=2024-05-31&end=2024-06-03").await;
  assert_eq!(status, StatusCode::OK);
  let rows = body["rows"].as_array().unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(rows[0]["indexName"], json!("SOFR"));
  assert_eq!(rows[0]["date"], json!("2024-05-31"));
  assert_eq!(rows[1]["value"], json!(5.32));

  // reversed bounds are not an error, they just select nothing
  let (status, body) = get(app().await, "/api/fixings?index=SOFR&start=2024-06-03&end=2024-05-30").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["rows"], json!([]));
}

#[tokio::test]
async fn latest_market_data_and_calibration() {
  let store = seeded_store().await;
  let (status, _) = get(app_with(store.clone(), config()).await, "/api/md/latest").await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = get(app_with(store.clone(), config()).await, "/api/calibration/latest").await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let snapshot = MarketSnapshot {
    curve_id: SOFR_CURVE_ID.into(),
    quote_time: Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
    rows: Curve::seed(),
  };
  store.save_market_data(&snapshot).await.unwrap();

  let (status, body) = get(app_with(store, config()).await, "/api/md/latest").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["rows"].as_array().unwrap().len(), snapshot.rows.len());
}

#[tokio::test]
async fn counterparty_cashflows_are_bucketed() {
  let (status, _) = get(app().await, "/api/counterparty-cashflows").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, body) = get(app().await, "/api/counterparty-cashflows?counterpartyId=CP1").await;
  assert_eq!(status, StatusCode::OK);
  let buckets = body["buckets"].as_array().unwrap();
  assert_eq!(buckets.len(), 1);
  assert_eq!(buckets[0]["bucket"], json!("week:2024-06-10"));
  assert_eq!(buckets[0]["cashflow"], json!(1500.0));
  assert_eq!(buckets[0]["weight"], json!(0.75));
  assert_eq!(buckets[0]["risk"]["c_1M"], json!(2.0));

  // `id` is accepted as an alias
  let (_, body) = get(app().await, "/api/counterparty-cashflows?id=CP2").await;
  assert_eq!(body["buckets"], json!([]));
}

#[tokio::test]
async fn risk_series_orders_non_zero_terms() {
  let (status, body) = get(app().await, "/api/risk-series/S1").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["exposures"], json!([{"term": "2Y", "value": -1.5}, {"term": "10Y", "value": 5.0}]));
  assert_eq!(body["dv01"], json!(3.5));

  let (status, _) = get(app().await, "/api/risk-series/S3").await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

fn signed_config() -> AppConfig {
  AppConfig {
    auth: Some(AuthConfig { hmac_key: "s3cret".into(), expected_origin: "https://blotter.example".into() }),
    ..config()
  }
}

fn now() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[tokio::test]
async fn signed_mode_rejects_unsigned_requests() {
  let (status, body) = get(app_with(seeded_store().await, signed_config()).await, "/api/swaps").await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(body["code"], json!(401));

  // health stays open
  let (status, _) = get(app_with(seeded_store().await, signed_config()).await, "/health").await;
  assert_eq!(status, StatusCode::OK);

  let ts = now();
  let forged = Request::builder()
    .uri("/api/swaps")
    .header("origin", "https://blotter.example")
    .header("x-timestamp", ts.to_string())
    .header("x-signature", auth::sign("wrong", "/api/swaps", ts).unwrap())
    .body(Body::empty())
    .unwrap();
  let (status, _) = send(app_with(seeded_store().await, signed_config()).await, forged).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signed_mode_accepts_signed_requests() {
  let ts = now();
  let req = Request::builder()
    .uri("/api/swaps?pageSize=1")
    .header("origin", "https://blotter.example")
    .header("x-timestamp", ts.to_string())
    .header("x-signature", auth::sign("s3cret", "/api/swaps", ts).unwrap())
    .body(Body::empty())
    .unwrap();
  let (status, body) = send(app_with(seeded_store().await, signed_config()).await, req).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["rows"].as_array().unwrap().len(), 1);
}
