use serde::{Deserialize, Serialize};

use crate::{
  analytics::{
    calibration::{DiscountRow, ForwardRow, ZeroRow},
    swap_details::FloatFixings,
    MdChange, SwapQuote, SwapValuation,
  },
  market::{datafeed::Direction, Curve},
  store::{RiskRecord, SwapRecord, DEFAULT_PAGE_SIZE},
};

fn default_page_size() -> u32 {
  DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
  StartAuto {
    #[serde(default)]
    interval_ms: Option<u64>,
  },
  StopAuto,
  UpdateInterval {
    interval_ms: u64,
  },
  SimulateOnce,
  Reset,
  ApplyCurve {
    data: Curve,
  },
  EditRate {
    term: String,
    rate: f64,
  },
  Recalibrate,
  Blotter {
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default)]
    sort_field: Option<String>,
    #[serde(default)]
    sort_order: Option<String>,
  },
  OpenSwap {
    id: String,
  },
  CloseSwap,
  FullReval,
  FloatFixings {
    #[serde(default)]
    index: Option<usize>,
  },
  Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
  Ready,
  Curve {
    data: Curve,
    moved_term: Option<String>,
    dir: Option<Direction>,
    seq: u64,
  },
  MdChanges {
    rows: Vec<MdChange>,
  },
  BlotterPage {
    total: i64,
    page: u32,
    page_size: u32,
    rows: Vec<SwapRecord>,
  },
  Approx {
    rows: Vec<SwapQuote>,
  },
  Curves {
    discount: Vec<DiscountRow>,
    zero: Vec<ZeroRow>,
    forward: Vec<ForwardRow>,
  },
  Calibrating,
  SwapOpened {
    swap: SwapRecord,
    risk_row: Option<RiskRecord>,
  },
  SwapDetails(Box<SwapValuation>),
  SwapLive {
    id: String,
    npv: f64,
    par_rate: f64,
  },
  FloatFixings(FloatFixings),
  Pong,
  Error {
    source: String,
    message: String,
  },
}

impl ServerMessage {
  pub fn error(source: impl Into<String>, message: impl ToString) -> Self {
    Self::Error { source: source.into(), message: message.to_string() }
  }
}
