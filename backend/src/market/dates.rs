use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};

use super::tenor::{Tenor, TenorUnit};

/// Weekend-only business day calendar.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessCalendar;

impl BusinessCalendar {
  pub fn is_business_day(&self, date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
  }

  pub fn following(&self, date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !self.is_business_day(d) {
      d += Duration::days(1);
    }
    d
  }

  pub fn preceding(&self, date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !self.is_business_day(d) {
      d -= Duration::days(1);
    }
    d
  }

  pub fn modified_following(&self, date: NaiveDate) -> NaiveDate {
    let next = self.following(date);
    if next.month() != date.month() {
      self.preceding(date)
    } else {
      next
    }
  }

  pub fn add_business_days(&self, date: NaiveDate, days: i32) -> NaiveDate {
    let step = if days >= 0 { 1 } else { -1 };
    let mut remaining = days.abs();
    let mut d = date;
    while remaining > 0 {
      d += Duration::days(step);
      if self.is_business_day(d) {
        remaining -= 1;
      }
    }
    d
  }

  /// Business days in `[start, end]`.
  pub fn bus_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
      .iter_days()
      .take_while(|d| *d <= end)
      .filter(|d| self.is_business_day(*d))
      .collect()
  }
}

/// Calendar months added with the day clamped to month end.
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
  let shifted = if months >= 0 {
    date.checked_add_months(Months::new(months as u32))
  } else {
    date.checked_sub_months(Months::new(months.unsigned_abs()))
  };
  shifted.unwrap_or(date)
}

/// Rolls `date` by `tenor` and adjusts the result to the following business day.
pub fn add_tenor(date: NaiveDate, tenor: Tenor, calendar: &BusinessCalendar) -> NaiveDate {
  let raw = match tenor.unit {
    TenorUnit::Week => date + Duration::days(7 * tenor.count as i64),
    TenorUnit::Month => add_months(date, tenor.count as i32),
    TenorUnit::Year => add_months(date, 12 * tenor.count as i32),
  };
  calendar.following(raw)
}

pub fn year_fraction_act360(start: NaiveDate, end: NaiveDate) -> f64 {
  (end - start).num_days() as f64 / 360.0
}
