use chrono::{DateTime, NaiveDate, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use crate::market::{Curve, RISK_TERMS};

/// One blotter row as stored in `main_tbl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SwapRecord {
  #[serde(rename = "ID")]
  pub id: String,
  #[serde(rename = "RowType")]
  pub row_type: Option<String>,
  #[serde(rename = "CounterpartyID")]
  pub counterparty_id: Option<String>,
  #[serde(rename = "StartDate")]
  pub start_date: Option<NaiveDate>,
  #[serde(rename = "TerminationDate")]
  pub termination_date: Option<NaiveDate>,
  #[serde(rename = "FixedRate")]
  pub fixed_rate: Option<f64>,
  #[serde(rename = "NPV")]
  pub npv: Option<f64>,
  #[serde(rename = "ParRate")]
  pub par_rate: Option<f64>,
  #[serde(rename = "Notional")]
  pub notional: Option<i64>,
  #[serde(rename = "SwapType")]
  pub swap_type: Option<String>,
  #[serde(rename = "PayFixed")]
  pub pay_fixed: Option<bool>,
}

/// Per-bucket deltas of one swap (or aggregate), aligned with [`RISK_TERMS`].
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RiskRecord {
  pub id: String,
  pub row_type: Option<String>,
  pub deltas: Vec<f64>,
  pub r: Option<f64>,
  pub z: Option<f64>,
}

impl RiskRecord {
  pub fn delta(&self, term: &str) -> Option<f64> {
    let i = RISK_TERMS.iter().position(|t| *t == term)?;
    self.deltas.get(i).copied()
  }

  /// `(c_<term>, delta)` pairs in bucket order.
  pub fn columns(&self) -> impl Iterator<Item = (String, f64)> + '_ {
    RISK_TERMS.iter().zip(self.deltas.iter()).map(|(t, v)| (format!("c_{}", t), *v))
  }
}

// flattened to the risk_tbl column layout: ID, c_1W..c_40Y, R, z, RowType
impl Serialize for RiskRecord {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.deltas.len() + 4))?;
    map.serialize_entry("ID", &self.id)?;
    for (key, value) in self.columns() {
      map.serialize_entry(&key, &value)?;
    }
    map.serialize_entry("R", &self.r)?;
    map.serialize_entry("z", &self.z)?;
    map.serialize_entry("RowType", &self.row_type)?;
    map.end()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AggRecord {
  #[serde(rename = "RowType")]
  pub row_type: String,
  #[serde(rename = "ID")]
  pub id: String,
  #[serde(rename = "NPV")]
  pub npv: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FixingRecord {
  pub index_name: String,
  pub date: NaiveDate,
  /// percent
  pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
  pub curve_id: String,
  pub timestamp: DateTime<Utc>,
  pub json: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
  pub curve_id: String,
  pub quote_time: DateTime<Utc>,
  pub rows: Curve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct CashflowRecord {
  #[serde(rename = "CounterpartyID")]
  pub counterparty_id: String,
  pub payment_date: NaiveDate,
  pub total_cashflow: Option<f64>,
  pub total_weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CashflowRiskRecord {
  pub counterparty_id: String,
  pub payment_date: NaiveDate,
  pub deltas: Vec<f64>,
}
