use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tokio::sync::RwLock;

use super::{
  AggRecord, BlotterStore, CalibrationRecord, CashflowRecord, CashflowRiskRecord, FixingRecord, MarketSnapshot,
  PageQuery, RiskRecord, SortOrder, StoreError, SwapRecord,
};

#[derive(Default)]
struct Tables {
  swaps: BTreeMap<String, SwapRecord>,
  risk: BTreeMap<(String, Option<String>), RiskRecord>,
  main_agg: BTreeMap<(String, String), AggRecord>,
  risk_agg: BTreeMap<(String, Option<String>), RiskRecord>,
  fixings: BTreeMap<(String, NaiveDate), FixingRecord>,
  calibrations: Vec<CalibrationRecord>,
  market_data: Vec<MarketSnapshot>,
  cashflows: BTreeMap<(String, NaiveDate), CashflowRecord>,
  cashflow_risk: BTreeMap<(String, NaiveDate), CashflowRiskRecord>,
}

/// Store kept entirely in memory, used when no database is configured.
#[derive(Clone, Default)]
pub struct MemoryStore {
  tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

fn insert_new<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: V) -> u64 {
  if map.contains_key(&key) {
    return 0;
  }
  map.insert(key, value);
  1
}

#[async_trait]
impl BlotterStore for MemoryStore {
  async fn count_swaps(&self) -> Result<i64, StoreError> {
    Ok(self.tables.read().await.swaps.len() as i64)
  }

  async fn list_swaps(&self, query: &PageQuery) -> Result<Vec<SwapRecord>, StoreError> {
    let tables = self.tables.read().await;
    let mut rows: Vec<&SwapRecord> = tables.swaps.values().collect();
    rows.sort_by(|a, b| {
      let ord = query.sort_field.compare(a, b).then_with(|| a.id.cmp(&b.id));
      match query.sort_order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
      }
    });
    Ok(
      rows
        .into_iter()
        .skip(query.offset() as usize)
        .take(query.page_size as usize)
        .cloned()
        .collect(),
    )
  }

  async fn swap_by_id(&self, id: &str) -> Result<Option<SwapRecord>, StoreError> {
    Ok(self.tables.read().await.swaps.get(id).cloned())
  }

  async fn risk_by_id(&self, id: &str) -> Result<Vec<RiskRecord>, StoreError> {
    let tables = self.tables.read().await;
    Ok(tables.risk.values().filter(|r| r.id == id).cloned().collect())
  }

  async fn risk_by_ids(&self, ids: &[String]) -> Result<Vec<RiskRecord>, StoreError> {
    let tables = self.tables.read().await;
    Ok(tables.risk.values().filter(|r| ids.contains(&r.id)).cloned().collect())
  }

  async fn main_agg(&self, id: &str, row_type: &str) -> Result<Option<AggRecord>, StoreError> {
    let tables = self.tables.read().await;
    Ok(tables.main_agg.get(&(row_type.to_string(), id.to_string())).cloned())
  }

  async fn fixings(&self, index: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<FixingRecord>, StoreError> {
    if start > end {
      return Ok(Vec::new());
    }
    let tables = self.tables.read().await;
    Ok(
      tables
        .fixings
        .range((index.to_string(), start)..=(index.to_string(), end))
        .map(|(_, f)| f.clone())
        .collect(),
    )
  }

  async fn latest_calibration(&self, curve_id: &str) -> Result<Option<CalibrationRecord>, StoreError> {
    let tables = self.tables.read().await;
    Ok(tables.calibrations.iter().filter(|c| c.curve_id == curve_id).max_by_key(|c| c.timestamp).cloned())
  }

  async fn save_calibration(&self, record: &CalibrationRecord) -> Result<(), StoreError> {
    self.tables.write().await.calibrations.push(record.clone());
    Ok(())
  }

  async fn latest_market_data(&self, curve_id: &str) -> Result<Option<MarketSnapshot>, StoreError> {
    let tables = self.tables.read().await;
    let Some(latest) = tables.market_data.iter().filter(|m| m.curve_id == curve_id).max_by_key(|m| m.quote_time) else {
      return Ok(None);
    };
    // snapshots saved within a second of the newest one belong to the same quote
    let window_start = latest.quote_time;
    let window_end = window_start + Duration::seconds(1);
    let mut rows = Vec::new();
    for snap in tables.market_data.iter().filter(|m| {
      m.curve_id == curve_id && m.quote_time >= window_start && m.quote_time < window_end
    }) {
      for p in snap.rows.points() {
        if !rows.iter().any(|r: &crate::market::CurvePoint| r.term == p.term) {
          rows.push(p.clone());
        }
      }
    }
    Ok(Some(MarketSnapshot { curve_id: curve_id.to_string(), quote_time: latest.quote_time, rows: rows.into_iter().collect() }))
  }

  async fn save_market_data(&self, snapshot: &MarketSnapshot) -> Result<(), StoreError> {
    self.tables.write().await.market_data.push(snapshot.clone());
    Ok(())
  }

  async fn counterparty_cashflows(&self, counterparty_id: &str, from: NaiveDate) -> Result<Vec<CashflowRecord>, StoreError> {
    let tables = self.tables.read().await;
    Ok(
      tables
        .cashflows
        .range((counterparty_id.to_string(), from)..=(counterparty_id.to_string(), NaiveDate::MAX))
        .map(|(_, c)| c)
        .cloned()
        .collect(),
    )
  }

  async fn counterparty_cashflow_risk(
    &self,
    counterparty_id: &str,
    from: NaiveDate,
  ) -> Result<Vec<CashflowRiskRecord>, StoreError> {
    let tables = self.tables.read().await;
    Ok(
      tables
        .cashflow_risk
        .range((counterparty_id.to_string(), from)..=(counterparty_id.to_string(), NaiveDate::MAX))
        .map(|(_, c)| c)
        .cloned()
        .collect(),
    )
  }

  async fn insert_swaps(&self, rows: &[SwapRecord]) -> Result<u64, StoreError> {
    let mut tables = self.tables.write().await;
    Ok(rows.iter().map(|r| insert_new(&mut tables.swaps, r.id.clone(), r.clone())).sum())
  }

  async fn insert_risk(&self, rows: &[RiskRecord]) -> Result<u64, StoreError> {
    let mut tables = self.tables.write().await;
    Ok(rows.iter().map(|r| insert_new(&mut tables.risk, (r.id.clone(), r.row_type.clone()), r.clone())).sum())
  }

  async fn insert_main_agg(&self, rows: &[AggRecord]) -> Result<u64, StoreError> {
    let mut tables = self.tables.write().await;
    Ok(rows.iter().map(|r| insert_new(&mut tables.main_agg, (r.row_type.clone(), r.id.clone()), r.clone())).sum())
  }

  async fn insert_risk_agg(&self, rows: &[RiskRecord]) -> Result<u64, StoreError> {
    let mut tables = self.tables.write().await;
    Ok(rows.iter().map(|r| insert_new(&mut tables.risk_agg, (r.id.clone(), r.row_type.clone()), r.clone())).sum())
  }

  async fn insert_fixings(&self, rows: &[FixingRecord]) -> Result<u64, StoreError> {
    let mut tables = self.tables.write().await;
    Ok(rows.iter().map(|r| insert_new(&mut tables.fixings, (r.index_name.clone(), r.date), r.clone())).sum())
  }

  async fn insert_cashflows(&self, rows: &[CashflowRecord]) -> Result<u64, StoreError> {
    let mut tables = self.tables.write().await;
    Ok(rows.iter().map(|r| insert_new(&mut tables.cashflows, (r.counterparty_id.clone(), r.payment_date), r.clone())).sum())
  }

  async fn insert_cashflow_risk(&self, rows: &[CashflowRiskRecord]) -> Result<u64, StoreError> {
    let mut tables = self.tables.write().await;
    Ok(
      rows
        .iter()
        .map(|r| insert_new(&mut tables.cashflow_risk, (r.counterparty_id.clone(), r.payment_date), r.clone()))
        .sum(),
    )
  }
}
