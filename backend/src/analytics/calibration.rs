use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::discount::{annual_schedule, DiscountCurve, Period};
use crate::market::{dates::add_tenor, dates::BusinessCalendar, Curve, CurveError, Tenor};

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-14;
const DF_LOWER: f64 = 1e-8;
const DF_UPPER: f64 = 1.5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
  #[error("market curve is empty")]
  EmptyMarket,
  #[error(transparent)]
  Curve(#[from] CurveError),
  #[error("tenors {0} and {1} share maturity {2}")]
  DuplicateMaturity(String, String, NaiveDate),
  #[error("solver did not converge for {term} after {iterations} iterations")]
  NotConverged { term: String, iterations: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRow {
  pub term: String,
  pub maturity: NaiveDate,
  pub df: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroRow {
  pub term: String,
  pub zero_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRow {
  pub term: String,
  pub days: i64,
  pub forward_rate: f64,
}

/// A bootstrapped curve together with the chart arrays derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedCurve {
  pub valuation_date: NaiveDate,
  pub market: Curve,
  pub discount: Vec<DiscountRow>,
  pub zero: Vec<ZeroRow>,
  pub forward: Vec<ForwardRow>,
  pub curve: DiscountCurve,
}

struct Instrument {
  term: String,
  rate: f64,
  maturity: NaiveDate,
  periods: Vec<Period>,
}

fn instruments(market: &Curve, valuation_date: NaiveDate, calendar: &BusinessCalendar) -> Result<Vec<Instrument>, CalibrationError> {
  if market.is_empty() {
    return Err(CalibrationError::EmptyMarket);
  }
  market.validate()?;

  let scale = market.rate_scale();
  let mut out = Vec::with_capacity(market.len());
  for p in market.points() {
    let tenor: Tenor = p.term.parse()?;
    let maturity = add_tenor(valuation_date, tenor, calendar);
    out.push(Instrument {
      term: p.term.clone(),
      rate: scale.to_decimal(p.rate),
      maturity,
      periods: annual_schedule(valuation_date, maturity, calendar),
    });
  }
  out.sort_by_key(|i| i.maturity);

  for w in out.windows(2) {
    if w[0].maturity == w[1].maturity {
      return Err(CalibrationError::DuplicateMaturity(w[0].term.clone(), w[1].term.clone(), w[1].maturity));
    }
  }
  Ok(out)
}

// par condition of a spot starting OIS: r * annuity - (1 - df(T)) = 0
fn par_residual(inst: &Instrument, curve: &DiscountCurve) -> f64 {
  let annuity: f64 = inst.periods.iter().map(|p| p.dcf * curve.df(p.payment)).sum();
  inst.rate * annuity - (1.0 - curve.df(inst.maturity))
}

fn solve_node(
  inst: &Instrument,
  valuation_date: NaiveDate,
  known: &[(NaiveDate, f64)],
) -> Result<f64, CalibrationError> {
  let with_node = |x: f64| {
    let mut nodes = known.to_vec();
    nodes.push((inst.maturity, x));
    DiscountCurve::new(valuation_date, nodes)
  };
  let f = |x: f64| par_residual(inst, &with_node(x));

  let (mut lo, mut hi) = (DF_LOWER, DF_UPPER);
  let bracketed = f(lo) * f(hi) < 0.0;
  let tau = (inst.maturity - valuation_date).num_days() as f64 / 360.0;
  let mut x = (1.0 / (1.0 + inst.rate * tau)).clamp(DF_LOWER, DF_UPPER);

  for iteration in 0..MAX_ITERATIONS {
    let fx = f(x);
    if fx.abs() <= TOLERANCE {
      return Ok(x);
    }
    if bracketed {
      if f(lo) * fx < 0.0 {
        hi = x;
      } else {
        lo = x;
      }
    }

    let h = 1e-7 * x.max(1e-3);
    let deriv = (f(x + h) - f(x - h)) / (2.0 * h);
    let newton = x - fx / deriv;
    let next = if deriv.is_finite() && deriv != 0.0 && newton > lo && newton < hi {
      newton
    } else if bracketed {
      0.5 * (lo + hi)
    } else {
      return Err(CalibrationError::NotConverged { term: inst.term.clone(), iterations: iteration + 1 });
    };

    if (next - x).abs() <= TOLERANCE * x.abs().max(1.0) {
      return Ok(next);
    }
    x = next;
  }

  Err(CalibrationError::NotConverged { term: inst.term.clone(), iterations: MAX_ITERATIONS })
}

/// Sequentially bootstraps one discount factor per pillar so every par OIS
/// reprices to its quoted rate.
pub fn bootstrap(market: &Curve, valuation_date: NaiveDate, calendar: &BusinessCalendar) -> Result<DiscountCurve, CalibrationError> {
  let insts = instruments(market, valuation_date, calendar)?;
  let mut nodes: Vec<(NaiveDate, f64)> = Vec::with_capacity(insts.len());
  for inst in &insts {
    let df = solve_node(inst, valuation_date, &nodes)?;
    nodes.push((inst.maturity, df));
  }
  Ok(DiscountCurve::new(valuation_date, nodes))
}

pub fn calibrate(market: &Curve, valuation_date: NaiveDate, calendar: &BusinessCalendar) -> Result<CalibratedCurve, CalibrationError> {
  let market = market.ordered();
  let curve = bootstrap(&market, valuation_date, calendar)?;

  let mut discount = Vec::with_capacity(market.len());
  let mut zero = Vec::with_capacity(market.len());
  let mut forward = Vec::with_capacity(market.len() + 1);

  forward.push(ForwardRow {
    term: "ON".to_string(),
    days: 0,
    forward_rate: curve.forward_rate(valuation_date, valuation_date + Duration::days(1)),
  });

  for p in market.points() {
    let tenor: Tenor = p.term.parse()?;
    let maturity = add_tenor(valuation_date, tenor, calendar);
    discount.push(DiscountRow { term: p.term.clone(), maturity, df: curve.df(maturity) });
    zero.push(ZeroRow { term: p.term.clone(), zero_rate: curve.zero_rate(maturity) });
    forward.push(ForwardRow {
      term: p.term.clone(),
      days: (maturity - valuation_date).num_days(),
      forward_rate: curve.forward_rate(maturity - Duration::days(1), maturity),
    });
  }

  debug!(pillars = market.len(), %valuation_date, "curve calibrated");
  Ok(CalibratedCurve { valuation_date, market, discount, zero, forward, curve })
}
