use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::market::dates::{add_months, year_fraction_act360, BusinessCalendar};

/// Log-linear discount curve over calendar days from the valuation date.
///
/// Dates beyond the last node extrapolate the last segment's log slope.
/// Dates before the valuation date extrapolate the first segment backwards,
/// so past accrual periods still project a sensible overnight rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountCurve {
  valuation_date: NaiveDate,
  nodes: Vec<(NaiveDate, f64)>,
}

impl DiscountCurve {
  /// `nodes` must be strictly increasing in date and start after the
  /// valuation date; a (valuation_date, 1.0) node is prepended.
  pub fn new(valuation_date: NaiveDate, nodes: Vec<(NaiveDate, f64)>) -> Self {
    let mut all = Vec::with_capacity(nodes.len() + 1);
    all.push((valuation_date, 1.0));
    all.extend(nodes.into_iter().filter(|(d, _)| *d > valuation_date));
    Self { valuation_date, nodes: all }
  }

  pub fn valuation_date(&self) -> NaiveDate {
    self.valuation_date
  }

  pub fn nodes(&self) -> &[(NaiveDate, f64)] {
    &self.nodes
  }

  fn days(&self, date: NaiveDate) -> f64 {
    (date - self.valuation_date).num_days() as f64
  }

  pub fn df(&self, date: NaiveDate) -> f64 {
    let t = self.days(date);
    if self.nodes.len() == 1 {
      return 1.0;
    }

    let last = self.nodes.len() - 1;
    let seg = match self.nodes.iter().position(|(d, _)| self.days(*d) >= t) {
      Some(0) => 0,
      Some(i) => i - 1,
      None => last - 1,
    };
    let (d0, df0) = self.nodes[seg];
    let (d1, df1) = self.nodes[seg + 1];
    let (t0, t1) = (self.days(d0), self.days(d1));
    let slope = (df1.ln() - df0.ln()) / (t1 - t0);
    (df0.ln() + slope * (t - t0)).exp()
  }

  /// Simple Act/360 rate between two dates, in percent.
  pub fn forward_rate(&self, start: NaiveDate, end: NaiveDate) -> f64 {
    let tau = year_fraction_act360(start, end);
    if tau <= 0.0 {
      return 0.0;
    }
    (self.df(start) / self.df(end) - 1.0) / tau * 100.0
  }

  /// Simple Act/360 term rate from the valuation date, in percent.
  pub fn zero_rate(&self, end: NaiveDate) -> f64 {
    self.forward_rate(self.valuation_date, end)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Period {
  pub start: NaiveDate,
  pub end: NaiveDate,
  pub payment: NaiveDate,
  pub dcf: f64,
}

// stubs shorter than this roll into the next period
const MIN_STUB_DAYS: i64 = 7;

/// Annual Act/360 schedule rolled backwards from `termination`, leaving any
/// stub at the front. Period ends are adjusted modified following.
pub fn annual_schedule(effective: NaiveDate, termination: NaiveDate, calendar: &BusinessCalendar) -> Vec<Period> {
  if termination <= effective {
    return Vec::new();
  }

  let mut rolls = vec![termination];
  let mut k = 1;
  loop {
    let d = add_months(termination, -12 * k);
    if (d - effective).num_days() < MIN_STUB_DAYS {
      break;
    }
    rolls.push(d);
    k += 1;
  }
  rolls.push(effective);
  rolls.reverse();

  let adjusted: Vec<NaiveDate> = rolls
    .iter()
    .enumerate()
    .map(|(i, d)| if i == 0 { calendar.following(*d) } else { calendar.modified_following(*d) })
    .collect();

  adjusted
    .windows(2)
    .map(|w| Period { start: w[0], end: w[1], payment: w[1], dcf: year_fraction_act360(w[0], w[1]) })
    .collect()
}
