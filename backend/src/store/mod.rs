pub mod memory;
pub mod models;
pub mod postgres;

use std::{cmp::Ordering, str::FromStr};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

pub use memory::MemoryStore;
pub use models::{
  AggRecord, CalibrationRecord, CashflowRecord, CashflowRiskRecord, FixingRecord, MarketSnapshot, RiskRecord,
  SwapRecord,
};
pub use postgres::PgStore;

pub const SOFR_CURVE_ID: &str = "sofr";
pub const SOFR_INDEX: &str = "sofr";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("unknown sort field: {0}")]
  InvalidSortField(String),
  #[error("unknown sort order: {0}")]
  InvalidSortOrder(String),
}

/// Blotter columns a page may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
  #[default]
  Id,
  RowType,
  CounterpartyId,
  StartDate,
  TerminationDate,
  FixedRate,
  Npv,
  ParRate,
  Notional,
  SwapType,
  PayFixed,
}

impl SortField {
  pub fn column(&self) -> &'static str {
    match self {
      Self::Id => "id",
      Self::RowType => "row_type",
      Self::CounterpartyId => "counterparty_id",
      Self::StartDate => "start_date",
      Self::TerminationDate => "termination_date",
      Self::FixedRate => "fixed_rate",
      Self::Npv => "npv",
      Self::ParRate => "par_rate",
      Self::Notional => "notional",
      Self::SwapType => "swap_type",
      Self::PayFixed => "pay_fixed",
    }
  }

  /// Compares two rows on this column, missing values first.
  pub fn compare(&self, a: &SwapRecord, b: &SwapRecord) -> Ordering {
    fn float(x: Option<f64>, y: Option<f64>) -> Ordering {
      match (x, y) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (x, y) => x.is_some().cmp(&y.is_some()),
      }
    }
    match self {
      Self::Id => a.id.cmp(&b.id),
      Self::RowType => a.row_type.cmp(&b.row_type),
      Self::CounterpartyId => a.counterparty_id.cmp(&b.counterparty_id),
      Self::StartDate => a.start_date.cmp(&b.start_date),
      Self::TerminationDate => a.termination_date.cmp(&b.termination_date),
      Self::FixedRate => float(a.fixed_rate, b.fixed_rate),
      Self::Npv => float(a.npv, b.npv),
      Self::ParRate => float(a.par_rate, b.par_rate),
      Self::Notional => a.notional.cmp(&b.notional),
      Self::SwapType => a.swap_type.cmp(&b.swap_type),
      Self::PayFixed => a.pay_fixed.cmp(&b.pay_fixed),
    }
  }
}

impl FromStr for SortField {
  type Err = StoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let key: String = s.chars().filter(|c| *c != '_').collect::<String>().to_lowercase();
    let field = match key.as_str() {
      "id" => Self::Id,
      "rowtype" => Self::RowType,
      "counterpartyid" => Self::CounterpartyId,
      "startdate" => Self::StartDate,
      "terminationdate" => Self::TerminationDate,
      "fixedrate" => Self::FixedRate,
      "npv" => Self::Npv,
      "parrate" => Self::ParRate,
      "notional" => Self::Notional,
      "swaptype" => Self::SwapType,
      "payfixed" => Self::PayFixed,
      _ => return Err(StoreError::InvalidSortField(s.to_string())),
    };
    Ok(field)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
  #[default]
  Asc,
  Desc,
}

impl SortOrder {
  pub fn sql(&self) -> &'static str {
    match self {
      Self::Asc => "ASC",
      Self::Desc => "DESC",
    }
  }
}

impl FromStr for SortOrder {
  type Err = StoreError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "asc" => Ok(Self::Asc),
      "desc" => Ok(Self::Desc),
      _ => Err(StoreError::InvalidSortOrder(s.to_string())),
    }
  }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
  pub page: u32,
  pub page_size: u32,
  pub sort_field: SortField,
  pub sort_order: SortOrder,
}

impl PageQuery {
  pub fn new(page: u32, page_size: u32, sort_field: SortField, sort_order: SortOrder) -> Self {
    Self { page, page_size: page_size.clamp(1, MAX_PAGE_SIZE), sort_field, sort_order }
  }

  /// Builds a query from loosely typed request parameters; absent sort keys take the defaults.
  pub fn parse(
    page: Option<u32>,
    page_size: Option<u32>,
    sort_field: Option<&str>,
    sort_order: Option<&str>,
  ) -> Result<Self, StoreError> {
    let sort_field = sort_field.filter(|s| !s.is_empty()).map(str::parse::<SortField>).transpose()?.unwrap_or_default();
    let sort_order = sort_order.filter(|s| !s.is_empty()).map(str::parse::<SortOrder>).transpose()?.unwrap_or_default();
    Ok(Self::new(page.unwrap_or(0), page_size.unwrap_or(DEFAULT_PAGE_SIZE), sort_field, sort_order))
  }

  pub fn offset(&self) -> u64 {
    self.page as u64 * self.page_size as u64
  }
}

impl Default for PageQuery {
  fn default() -> Self {
    Self::new(0, DEFAULT_PAGE_SIZE, SortField::Id, SortOrder::Asc)
  }
}

/// Thin query layer over the blotter tables.
#[async_trait]
pub trait BlotterStore: Send + Sync {
  async fn count_swaps(&self) -> Result<i64, StoreError>;
  async fn list_swaps(&self, query: &PageQuery) -> Result<Vec<SwapRecord>, StoreError>;
  async fn swap_by_id(&self, id: &str) -> Result<Option<SwapRecord>, StoreError>;

  async fn risk_by_id(&self, id: &str) -> Result<Vec<RiskRecord>, StoreError>;
  async fn risk_by_ids(&self, ids: &[String]) -> Result<Vec<RiskRecord>, StoreError>;
  async fn main_agg(&self, id: &str, row_type: &str) -> Result<Option<AggRecord>, StoreError>;

  /// Fixings for `index` with `start <= date <= end`, oldest first.
  async fn fixings(&self, index: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<FixingRecord>, StoreError>;

  async fn latest_calibration(&self, curve_id: &str) -> Result<Option<CalibrationRecord>, StoreError>;
  async fn save_calibration(&self, record: &CalibrationRecord) -> Result<(), StoreError>;
  async fn latest_market_data(&self, curve_id: &str) -> Result<Option<MarketSnapshot>, StoreError>;
  async fn save_market_data(&self, snapshot: &MarketSnapshot) -> Result<(), StoreError>;

  async fn counterparty_cashflows(&self, counterparty_id: &str, from: NaiveDate) -> Result<Vec<CashflowRecord>, StoreError>;
  async fn counterparty_cashflow_risk(
    &self,
    counterparty_id: &str,
    from: NaiveDate,
  ) -> Result<Vec<CashflowRiskRecord>, StoreError>;

  // bulk loads skip rows whose key already exists and return the inserted count
  async fn insert_swaps(&self, rows: &[SwapRecord]) -> Result<u64, StoreError>;
  async fn insert_risk(&self, rows: &[RiskRecord]) -> Result<u64, StoreError>;
  async fn insert_main_agg(&self, rows: &[AggRecord]) -> Result<u64, StoreError>;
  async fn insert_risk_agg(&self, rows: &[RiskRecord]) -> Result<u64, StoreError>;
  async fn insert_fixings(&self, rows: &[FixingRecord]) -> Result<u64, StoreError>;
  async fn insert_cashflows(&self, rows: &[CashflowRecord]) -> Result<u64, StoreError>;
  async fn insert_cashflow_risk(&self, rows: &[CashflowRiskRecord]) -> Result<u64, StoreError>;
}
