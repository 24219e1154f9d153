use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::{
  market::RISK_TERMS,
  store::{CashflowRecord, CashflowRiskRecord},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey {
  pub key: String,
  pub label: String,
  pub start_date: NaiveDate,
  pub start_days: i64,
  pub span_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashflowBucket {
  pub bucket: String,
  pub label: String,
  pub start_date: NaiveDate,
  pub start_days: i64,
  pub span_days: i64,
  pub cashflow: f64,
  pub weight: f64,
  pub risk: BTreeMap<String, f64>,
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

fn key(kind: &str, id: String, label: String, start: NaiveDate, today: NaiveDate, span_days: i64) -> BucketKey {
  BucketKey {
    key: format!("{}:{}", kind, id),
    label,
    start_date: start,
    start_days: (start - today).num_days(),
    span_days,
  }
}

/// Ladder bucket a payment date falls into, relative to `today`.
///
/// Daily for a week, weekly (Monday start) for a month, monthly for a year,
/// yearly for ten years and five-year blocks out to forty years.
pub fn bucket_for_date(date: NaiveDate, today: NaiveDate) -> Option<BucketKey> {
  let diff = (date - today).num_days();
  if diff < 0 {
    return None;
  }

  if diff <= 7 {
    let label = date.format("%Y-%m-%d").to_string();
    return Some(key("day", label.clone(), label, date, today, 1));
  }

  if diff <= 30 {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    let id = monday.format("%Y-%m-%d").to_string();
    let label = format!("Week of {}", id);
    return Some(key("week", id, label, monday, today, 7));
  }

  if diff <= 365 {
    let start = ymd(date.year(), date.month(), 1);
    let next = if date.month() == 12 { ymd(date.year() + 1, 1, 1) } else { ymd(date.year(), date.month() + 1, 1) };
    let span = (next - start).num_days().max(28);
    let label = start.format("%Y-%m").to_string();
    return Some(key("month", label.clone(), label, start, today, span));
  }

  if diff <= 365 * 10 {
    let start = ymd(date.year(), 1, 1);
    let span = (ymd(date.year() + 1, 1, 1) - start).num_days();
    let label = date.year().to_string();
    return Some(key("year", label.clone(), label, start, today, span));
  }

  let base = today.year();
  if date.year() > base + 40 {
    return None;
  }
  let start_year = base + (date.year() - base).div_euclid(5) * 5;
  let start = ymd(start_year, 1, 1);
  let span = (ymd(start_year + 5, 1, 1) - start).num_days();
  let label = format!("{}-{}", start_year, start_year + 4);
  Some(key("5y", label.clone(), label, start, today, span))
}

/// Sums a counterparty's cashflows and bucket risk into the ladder, ordered
/// by bucket start.
pub fn aggregate_counterparty(
  cashflows: &[CashflowRecord],
  risk_rows: &[CashflowRiskRecord],
  today: NaiveDate,
) -> Vec<CashflowBucket> {
  let mut buckets: HashMap<String, CashflowBucket> = HashMap::new();

  let mut upsert = |bk: BucketKey| -> String {
    let id = bk.key.clone();
    buckets.entry(id.clone()).or_insert_with(|| CashflowBucket {
      bucket: bk.key,
      label: bk.label,
      start_date: bk.start_date,
      start_days: bk.start_days,
      span_days: bk.span_days,
      cashflow: 0.0,
      weight: 0.0,
      risk: BTreeMap::new(),
    });
    id
  };

  let mut cash_keys = Vec::with_capacity(cashflows.len());
  for row in cashflows {
    if let Some(bk) = bucket_for_date(row.payment_date, today) {
      cash_keys.push((upsert(bk), row));
    }
  }
  let mut risk_keys = Vec::with_capacity(risk_rows.len());
  for row in risk_rows {
    if let Some(bk) = bucket_for_date(row.payment_date, today) {
      risk_keys.push((upsert(bk), row));
    }
  }

  for (id, row) in cash_keys {
    if let Some(entry) = buckets.get_mut(&id) {
      entry.cashflow += row.total_cashflow.unwrap_or(0.0);
      entry.weight += row.total_weight.unwrap_or(0.0);
    }
  }
  for (id, row) in risk_keys {
    if let Some(entry) = buckets.get_mut(&id) {
      for (term, value) in RISK_TERMS.iter().zip(row.deltas.iter()) {
        if value.is_finite() {
          *entry.risk.entry(format!("c_{}", term)).or_insert(0.0) += value;
        }
      }
    }
  }

  let mut out: Vec<CashflowBucket> = buckets.into_values().collect();
  out.sort_by(|a, b| a.start_days.cmp(&b.start_days).then_with(|| a.bucket.cmp(&b.bucket)));
  out
}
