use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
  market::Curve,
  store::{RiskRecord, SwapRecord},
};

// stands in for a zero fixed rate risk when solving for the par rate
const ZERO_RISK_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MdChange {
  #[serde(rename = "Term")]
  pub term: String,
  /// basis points
  #[serde(rename = "Change")]
  pub change: f64,
}

/// First order re-pricing of one blotter row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
  #[serde(rename = "ID")]
  pub id: String,
  #[serde(rename = "NPV")]
  pub npv: f64,
  #[serde(rename = "ParRate")]
  pub par_rate: f64,
}

/// Per-pillar move of `current` against `base`, in base order.
///
/// `current` is aligned to the base pillars; a pillar missing from it takes
/// the last aligned value, or the next one when nothing precedes it.
pub fn md_changes(base: &Curve, current: &Curve) -> Vec<MdChange> {
  let bp = base.rate_scale().bp();
  let raw: Vec<Option<f64>> = base.terms().map(|t| current.rate(t)).collect();

  let mut aligned: Vec<Option<f64>> = Vec::with_capacity(raw.len());
  let mut last = None;
  for v in &raw {
    last = v.or(last);
    aligned.push(last);
  }
  let mut next = None;
  for (slot, v) in aligned.iter_mut().zip(raw.iter()).rev() {
    next = v.or(next);
    if slot.is_none() {
      *slot = next;
    }
  }

  base
    .points()
    .iter()
    .zip(aligned)
    .map(|(p, cur)| MdChange {
      term: p.term.clone(),
      change: cur.map(|c| (c - p.rate) / bp).unwrap_or(0.0),
    })
    .collect()
}

/// `NPV + risk . changes`, then `ParRate = FixedRate + NPV / R`.
///
/// Rows without a risk row, a stored NPV or a fixed rate are left out and keep
/// their stored values.
pub fn approximate_swaps(swaps: &[SwapRecord], risk: &[RiskRecord], changes: &[MdChange]) -> Vec<SwapQuote> {
  let by_id: HashMap<&str, &RiskRecord> = risk.iter().map(|r| (r.id.as_str(), r)).collect();

  swaps
    .iter()
    .filter_map(|swap| {
      let row = by_id.get(swap.id.as_str())?;
      let npv = swap.npv?;
      let fixed_rate = swap.fixed_rate?;

      let move_pv: f64 = changes.iter().map(|c| row.delta(&c.term).unwrap_or(0.0) * c.change).sum();
      let new_npv = npv + move_pv;

      let r = match row.r.unwrap_or(0.0) {
        x if x == 0.0 || !x.is_finite() => ZERO_RISK_FLOOR,
        x => x,
      };
      Some(SwapQuote { id: swap.id.clone(), npv: new_npv, par_rate: fixed_rate + new_npv / r })
    })
    .collect()
}
