use std::{cmp::Ordering, fmt, str::FromStr};

use super::CurveError;

// longest pillar accepted from a label
const MAX_TENOR_YEARS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenorUnit {
  Week,
  Month,
  Year,
}

/// A curve pillar label such as `1W`, `18M` or `40Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tenor {
  pub count: u32,
  pub unit: TenorUnit,
}

impl Tenor {
  pub fn new(count: u32, unit: TenorUnit) -> Self {
    Self { count, unit }
  }

  /// Rough length used for ordering pillars (W = 7, M = 30, Y = 365 days).
  pub fn approx_days(&self) -> u64 {
    let count = u64::from(self.count);
    match self.unit {
      TenorUnit::Week => count * 7,
      TenorUnit::Month => count * 30,
      TenorUnit::Year => count * 365,
    }
  }

  pub fn years(&self) -> f64 {
    match self.unit {
      TenorUnit::Week => self.count as f64 / 52.0,
      TenorUnit::Month => self.count as f64 / 12.0,
      TenorUnit::Year => self.count as f64,
    }
  }
}

impl FromStr for Tenor {
  type Err = CurveError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let label = s.trim();
    let err = || CurveError::InvalidTenor(s.to_string());

    let unit_char = label.chars().last().ok_or_else(err)?;
    let unit = match unit_char.to_ascii_uppercase() {
      'W' => TenorUnit::Week,
      'M' => TenorUnit::Month,
      'Y' => TenorUnit::Year,
      _ => return Err(err()),
    };
    let count = label[..label.len() - unit_char.len_utf8()]
      .parse::<u32>()
      .map_err(|_| err())?;
    let tenor = Self { count, unit };
    if count == 0 || tenor.years() > MAX_TENOR_YEARS {
      return Err(err());
    }
    Ok(tenor)
  }
}

impl fmt::Display for Tenor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let unit = match self.unit {
      TenorUnit::Week => 'W',
      TenorUnit::Month => 'M',
      TenorUnit::Year => 'Y',
    };
    write!(f, "{}{}", self.count, unit)
  }
}

impl Ord for Tenor {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .approx_days()
      .cmp(&other.approx_days())
      .then_with(|| self.count.cmp(&other.count))
  }
}

impl PartialOrd for Tenor {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Orders two term labels: parseable tenors first by length, then anything
/// else lexicographically.
pub fn compare_terms(a: &str, b: &str) -> Ordering {
  match (a.parse::<Tenor>(), b.parse::<Tenor>()) {
    (Ok(x), Ok(y)) => x.cmp(&y),
    (Ok(_), Err(_)) => Ordering::Less,
    (Err(_), Ok(_)) => Ordering::Greater,
    (Err(_), Err(_)) => a.cmp(b),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_labels() {
    assert_eq!("1W".parse::<Tenor>().unwrap(), Tenor::new(1, TenorUnit::Week));
    assert_eq!(" 18m ".parse::<Tenor>().unwrap(), Tenor::new(18, TenorUnit::Month));
    assert_eq!("40Y".parse::<Tenor>().unwrap().to_string(), "40Y");
    assert!("ON".parse::<Tenor>().is_err());
    assert!("0M".parse::<Tenor>().is_err());
    assert!("".parse::<Tenor>().is_err());
  }

  #[test]
  fn rejects_oversized_counts() {
    assert!("100Y".parse::<Tenor>().is_ok());
    assert!("1200M".parse::<Tenor>().is_ok());
    assert!("101Y".parse::<Tenor>().is_err());
    assert!("99999999Y".parse::<Tenor>().is_err());
    assert!("99999999999W".parse::<Tenor>().is_err());

    // built directly, still ordered without overflow
    let huge = Tenor::new(u32::MAX, TenorUnit::Year);
    assert_eq!(huge.approx_days(), u64::from(u32::MAX) * 365);
    assert!(huge > Tenor::new(40, TenorUnit::Year));
  }

  #[test]
  fn orders_by_length() {
    let mut terms = vec!["2Y", "3M", "1W", "12M", "18M", "1Y"];
    terms.sort_by(|a, b| compare_terms(a, b));
    assert_eq!(terms, vec!["1W", "3M", "12M", "1Y", "18M", "2Y"]);
  }

  #[test]
  fn non_tenors_sort_last() {
    let mut terms = vec!["misc", "6M", "alpha", "1Y"];
    terms.sort_by(|a, b| compare_terms(a, b));
    assert_eq!(terms, vec!["6M", "1Y", "alpha", "misc"]);
  }
}
