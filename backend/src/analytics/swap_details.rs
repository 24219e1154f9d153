use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use super::{
  calibration::{bootstrap, CalibrationError},
  discount::{annual_schedule, DiscountCurve, Period},
  risk_series::RiskSeries,
};
use crate::{
  market::{dates::BusinessCalendar, Curve},
  store::{FixingRecord, SwapRecord},
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PricingError {
  #[error("swap {id} has no {field}")]
  MissingField { id: String, field: &'static str },
  #[error("swap {0} terminates on or before its start date")]
  InvalidDates(String),
  #[error("float period {0} does not exist")]
  UnknownPeriod(usize),
  #[error(transparent)]
  Calibration(#[from] CalibrationError),
}

/// Economic terms of a fixed/float SOFR swap.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapTerms {
  pub id: String,
  pub effective: NaiveDate,
  pub termination: NaiveDate,
  /// positive pays fixed
  pub notional: f64,
  /// percent
  pub fixed_rate: f64,
}

impl SwapTerms {
  pub fn from_record(rec: &SwapRecord) -> Result<Self, PricingError> {
    let missing = |field| PricingError::MissingField { id: rec.id.clone(), field };
    let effective = rec.start_date.ok_or_else(|| missing("start date"))?;
    let termination = rec.termination_date.ok_or_else(|| missing("termination date"))?;
    let notional = rec.notional.ok_or_else(|| missing("notional"))? as f64;
    let fixed_rate = rec.fixed_rate.ok_or_else(|| missing("fixed rate"))?;
    if termination <= effective {
      return Err(PricingError::InvalidDates(rec.id.clone()));
    }

    // an explicit direction wins over the notional sign
    let notional = match rec.pay_fixed {
      Some(true) => notional.abs(),
      Some(false) => -notional.abs(),
      None => notional,
    };
    Ok(Self { id: rec.id.clone(), effective, termination, notional, fixed_rate })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashflowRow {
  pub period: usize,
  pub start: NaiveDate,
  pub end: NaiveDate,
  pub payment: NaiveDate,
  pub dcf: f64,
  pub notional: f64,
  /// percent
  pub rate: f64,
  pub cashflow: f64,
  pub df: f64,
  pub npv: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixingSource {
  Published,
  Filled,
  Projected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixingDay {
  pub date: NaiveDate,
  pub accrual_days: i64,
  /// percent
  pub rate: f64,
  pub source: FixingSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatFixings {
  pub index: usize,
  pub cashflow: CashflowRow,
  pub rows: Vec<FixingDay>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketDelta {
  pub term: String,
  pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapValuation {
  pub id: String,
  pub valuation_date: NaiveDate,
  pub npv: f64,
  pub par_rate: f64,
  pub fixed_rate: f64,
  pub fixed_rate_risk: f64,
  pub fixed_flows: Vec<CashflowRow>,
  pub float_flows: Vec<CashflowRow>,
  pub risk: Vec<BucketDelta>,
  pub risk_series: RiskSeries,
}

struct Legs {
  fixed: Vec<CashflowRow>,
  float: Vec<CashflowRow>,
  npv: f64,
  fixed_rate_risk: f64,
}

/// One swap priced against a market curve and its published fixings.
pub struct SwapContext {
  terms: SwapTerms,
  valuation_date: NaiveDate,
  market: Curve,
  curve: DiscountCurve,
  fixings: BTreeMap<NaiveDate, f64>,
  periods: Vec<Period>,
  calendar: BusinessCalendar,
}

impl SwapContext {
  pub fn new(
    record: &SwapRecord,
    market: Curve,
    valuation_date: NaiveDate,
    fixings: &[FixingRecord],
  ) -> Result<Self, PricingError> {
    let calendar = BusinessCalendar;
    let terms = SwapTerms::from_record(record)?;
    let curve = bootstrap(&market, valuation_date, &calendar)?;
    let periods = annual_schedule(terms.effective, terms.termination, &calendar);
    let fixings = fixings.iter().map(|f| (f.date, f.value)).collect();
    Ok(Self { terms, valuation_date, market, curve, fixings, periods, calendar })
  }

  pub fn id(&self) -> &str {
    &self.terms.id
  }

  /// Swaps in a new market curve; the previous one is kept if it fails to calibrate.
  pub fn update_market(&mut self, market: Curve) -> Result<(), PricingError> {
    self.curve = bootstrap(&market, self.valuation_date, &self.calendar)?;
    self.market = market;
    Ok(())
  }

  /// Full revaluation: both legs, par rate and bump-and-recalibrate bucket deltas.
  pub fn value(&self) -> Result<SwapValuation, PricingError> {
    let legs = self.legs(&self.curve);

    let scale = self.market.rate_scale();
    let mut risk = Vec::with_capacity(self.market.len());
    for p in self.market.points() {
      let mut bumped = self.market.clone();
      bumped.set_rate(&p.term, p.rate + scale.bp()).map_err(CalibrationError::from)?;
      let curve = bootstrap(&bumped, self.valuation_date, &self.calendar)?;
      risk.push(BucketDelta { term: p.term.clone(), delta: self.legs(&curve).npv - legs.npv });
    }
    let risk_series = RiskSeries::from_values(risk.iter().map(|b| (b.term.as_str(), b.delta)));

    let par_rate = if legs.fixed_rate_risk == 0.0 {
      self.terms.fixed_rate
    } else {
      self.terms.fixed_rate + legs.npv / legs.fixed_rate_risk
    };

    Ok(SwapValuation {
      id: self.terms.id.clone(),
      valuation_date: self.valuation_date,
      npv: legs.npv,
      par_rate,
      fixed_rate: self.terms.fixed_rate,
      fixed_rate_risk: legs.fixed_rate_risk,
      fixed_flows: legs.fixed,
      float_flows: legs.float,
      risk,
      risk_series,
    })
  }

  /// NPV only, for live tickers.
  pub fn npv(&self) -> f64 {
    self.legs(&self.curve).npv
  }

  /// Daily rates behind float period `index`.
  pub fn float_fixings(&self, index: usize) -> Result<FloatFixings, PricingError> {
    let period = self.periods.get(index).ok_or(PricingError::UnknownPeriod(index))?;
    let rows = self.fixing_days(period, &self.curve);
    let cashflow = self.float_row(index, period, &self.curve);
    Ok(FloatFixings { index, cashflow, rows })
  }

  fn is_live(&self, p: &Period) -> bool {
    p.payment >= self.valuation_date
  }

  fn legs(&self, curve: &DiscountCurve) -> Legs {
    let n = self.terms.notional;
    let k = self.terms.fixed_rate;
    let mut annuity = 0.0;

    let fixed: Vec<CashflowRow> = self
      .periods
      .iter()
      .enumerate()
      .map(|(i, p)| {
        let cashflow = -n * k / 100.0 * p.dcf;
        let df = if self.is_live(p) { curve.df(p.payment) } else { 0.0 };
        annuity += p.dcf * df;
        CashflowRow {
          period: i,
          start: p.start,
          end: p.end,
          payment: p.payment,
          dcf: p.dcf,
          notional: n,
          rate: k,
          cashflow,
          df,
          npv: cashflow * df,
        }
      })
      .collect();

    let float: Vec<CashflowRow> = self.periods.iter().enumerate().map(|(i, p)| self.float_row(i, p, curve)).collect();

    let npv = fixed.iter().chain(float.iter()).map(|r| r.npv).sum();
    Legs { fixed, float, npv, fixed_rate_risk: n * annuity / 100.0 }
  }

  fn float_row(&self, i: usize, p: &Period, curve: &DiscountCurve) -> CashflowRow {
    let n = self.terms.notional;
    let rate = self.float_rate(p, curve);
    let cashflow = n * rate / 100.0 * p.dcf;
    let df = if self.is_live(p) { curve.df(p.payment) } else { 0.0 };
    CashflowRow {
      period: i,
      start: p.start,
      end: p.end,
      payment: p.payment,
      dcf: p.dcf,
      notional: n,
      rate,
      cashflow,
      df,
      npv: cashflow * df,
    }
  }

  // first business day whose rate is not yet published
  fn projection_start(&self) -> NaiveDate {
    self.calendar.following(self.valuation_date)
  }

  /// Compounded period rate in percent: known fixings up to the valuation
  /// date, then the curve's growth to the period end.
  fn float_rate(&self, p: &Period, curve: &DiscountCurve) -> f64 {
    if p.dcf <= 0.0 {
      return 0.0;
    }
    let split = self.projection_start().clamp(p.start, p.end);

    let mut growth: f64 = self
      .fixing_days(&Period { end: split, ..*p }, curve)
      .iter()
      .map(|d| 1.0 + d.rate / 100.0 * d.accrual_days as f64 / 360.0)
      .product();
    if split < p.end {
      growth *= curve.df(split) / curve.df(p.end);
    }
    (growth - 1.0) / p.dcf * 100.0
  }

  fn fixing_days(&self, p: &Period, curve: &DiscountCurve) -> Vec<FixingDay> {
    let projected_from = self.projection_start();
    let days = self.calendar.bus_date_range(p.start, p.end);

    days
      .iter()
      .filter(|d| **d < p.end)
      .map(|d| {
        let next = self.calendar.add_business_days(*d, 1).min(p.end);
        let (rate, source) = if *d >= projected_from {
          (curve.forward_rate(*d, next), FixingSource::Projected)
        } else if let Some(v) = self.fixings.get(d) {
          (*v, FixingSource::Published)
        } else if let Some((_, v)) = self.fixings.range(..*d).next_back() {
          (*v, FixingSource::Filled)
        } else {
          (curve.forward_rate(*d, next), FixingSource::Projected)
        };
        FixingDay { date: *d, accrual_days: (next - *d).num_days(), rate, source }
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  fn record(start: NaiveDate, end: NaiveDate, fixed: f64, notional: i64) -> SwapRecord {
    SwapRecord {
      id: "S1".into(),
      row_type: Some("swap".into()),
      counterparty_id: Some("CP1".into()),
      start_date: Some(start),
      termination_date: Some(end),
      fixed_rate: Some(fixed),
      npv: None,
      par_rate: None,
      notional: Some(notional),
      swap_type: Some("IRS".into()),
      pay_fixed: None,
    }
  }

  #[test]
  fn spot_swap_at_par_rate_has_zero_npv() {
    // the 5Y pillar instrument itself: spot start, quoted rate
    let val = d(2024, 3, 1);
    let rec = record(val, d(2029, 3, 1), 4.352, 10_000_000);
    let ctx = SwapContext::new(&rec, Curve::seed(), val, &[]).unwrap();
    let out = ctx.value().unwrap();
    assert!(out.npv.abs() < 1e-4, "npv {}", out.npv);
    assert_relative_eq!(out.par_rate, 4.352, epsilon = 1e-8);
    assert_eq!(out.fixed_flows.len(), 5);
    assert_eq!(out.float_flows.len(), 5);
  }

  #[test]
  fn par_rate_consistent_with_fixed_rate_risk() {
    let val = d(2024, 3, 1);
    let rec = record(val, d(2031, 3, 3), 3.9, 25_000_000);
    let ctx = SwapContext::new(&rec, Curve::seed(), val, &[]).unwrap();
    let out = ctx.value().unwrap();

    // repricing at the par rate zeroes the NPV
    let at_par = record(val, d(2031, 3, 3), out.par_rate, 25_000_000);
    let ctx_par = SwapContext::new(&at_par, Curve::seed(), val, &[]).unwrap();
    assert!(ctx_par.npv().abs() < 1e-4);
    assert!(out.fixed_rate_risk > 0.0);
  }

  #[test]
  fn payer_gains_when_rates_rise() {
    let val = d(2024, 3, 1);
    let rec = record(val, d(2034, 3, 1), 4.2, 10_000_000);
    let out = SwapContext::new(&rec, Curve::seed(), val, &[]).unwrap().value().unwrap();
    assert_eq!(out.risk.len(), 31);
    assert!(out.risk_series.dv01 > 0.0);
    let ten = out.risk.iter().find(|b| b.term == "10Y").unwrap();
    assert!(ten.delta > 0.0);
    // pillars beyond maturity carry no risk
    let thirty = out.risk.iter().find(|b| b.term == "30Y").unwrap();
    assert!(thirty.delta.abs() < 1e-6);

    let mut receiver = rec.clone();
    receiver.pay_fixed = Some(false);
    let rcv = SwapContext::new(&receiver, Curve::seed(), val, &[]).unwrap().value().unwrap();
    assert_relative_eq!(rcv.npv, -out.npv, epsilon = 1e-6);
  }

  #[test]
  fn seasoned_swap_uses_fixings() {
    let val = d(2024, 3, 1);
    let start = d(2024, 2, 1);
    let fixings: Vec<FixingRecord> = BusinessCalendar
      .bus_date_range(start, d(2024, 2, 28))
      .into_iter()
      .map(|date| FixingRecord { index_name: "sofr".into(), date, value: 5.31 })
      .collect();
    let rec = record(start, d(2026, 2, 2), 4.8, 5_000_000);
    let ctx = SwapContext::new(&rec, Curve::seed(), val, &fixings).unwrap();

    let first = ctx.float_fixings(0).unwrap();
    let published = first.rows.iter().filter(|r| r.source == FixingSource::Published).count();
    assert_eq!(published, fixings.len());
    // 2024-02-29 has no fixing and takes the last published value
    let leap = first.rows.iter().find(|r| r.date == d(2024, 2, 29)).unwrap();
    assert_eq!(leap.source, FixingSource::Filled);
    assert_relative_eq!(leap.rate, 5.31);
    assert!(first.rows.iter().any(|r| r.source == FixingSource::Projected));
    assert!(first.cashflow.rate > 5.0 && first.cashflow.rate < 5.6);

    assert_eq!(ctx.float_fixings(9), Err(PricingError::UnknownPeriod(9)));
  }

  #[test]
  fn rejects_incomplete_records() {
    let val = d(2024, 3, 1);
    let mut rec = record(val, d(2029, 3, 1), 4.0, 1_000_000);
    rec.notional = None;
    assert!(matches!(
      SwapContext::new(&rec, Curve::seed(), val, &[]),
      Err(PricingError::MissingField { field: "notional", .. })
    ));
    let backwards = record(d(2029, 3, 1), val, 4.0, 1_000_000);
    assert!(matches!(SwapContext::new(&backwards, Curve::seed(), val, &[]), Err(PricingError::InvalidDates(_))));
  }

  #[test]
  fn update_market_keeps_old_curve_on_failure() {
    let val = d(2024, 3, 1);
    let rec = record(val, d(2029, 3, 1), 4.352, 10_000_000);
    let mut ctx = SwapContext::new(&rec, Curve::seed(), val, &[]).unwrap();
    let before = ctx.npv();
    assert!(ctx.update_market(Curve::default()).is_err());
    assert_relative_eq!(ctx.npv(), before);

    let mut up = Curve::seed();
    for p in Curve::seed().points() {
      up.set_rate(&p.term, p.rate + 0.001).unwrap();
    }
    ctx.update_market(up).unwrap();
    assert!(ctx.npv() > before);
  }
}
