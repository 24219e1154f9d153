use serde::{Deserialize, Serialize};

use super::{tenor::compare_terms, CurveError, Tenor};

/// Risk bucket labels, one per seed pillar.
pub const RISK_TERMS: [&str; 31] = [
  "1W", "2W", "3W", "1M", "2M", "3M", "4M", "5M", "6M", "7M", "8M", "9M", "10M", "11M", "12M",
  "18M", "2Y", "3Y", "4Y", "5Y", "6Y", "7Y", "8Y", "9Y", "10Y", "12Y", "15Y", "20Y", "25Y", "30Y", "40Y",
];

// USD SOFR seed quotes in percent
const SEED_RATES_PCT: [f64; 31] = [
  5.309, 5.312, 5.314, 5.318, 5.351, 5.382, 5.410, 5.435, 5.452, 5.467, 5.471, 5.470, 5.467, 5.457,
  5.445, 5.208, 4.990, 4.650, 4.458, 4.352, 4.291, 4.250, 4.224, 4.210, 4.201, 4.198, 4.199, 4.153,
  4.047, 3.941, 3.719,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
  #[serde(rename = "Term")]
  pub term: String,
  #[serde(rename = "Rate")]
  pub rate: f64,
}

impl CurvePoint {
  pub fn new(term: impl Into<String>, rate: f64) -> Self {
    Self { term: term.into(), rate }
  }
}

/// Units a curve's rates are quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScale {
  Decimal,
  Percent,
}

impl RateScale {
  /// One basis point in this scale.
  pub fn bp(self) -> f64 {
    match self {
      Self::Decimal => 1e-4,
      Self::Percent => 1e-2,
    }
  }

  pub fn to_decimal(self, rate: f64) -> f64 {
    match self {
      Self::Decimal => rate,
      Self::Percent => rate / 100.0,
    }
  }
}

/// Ordered (term, rate) pairs making up a market curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve {
  points: Vec<CurvePoint>,
}

impl Curve {
  pub fn new(points: Vec<CurvePoint>) -> Self {
    Self { points }
  }

  /// The 31 pillar USD SOFR curve the simulator starts from, in decimals.
  pub fn seed() -> Self {
    let points = RISK_TERMS
      .iter()
      .zip(SEED_RATES_PCT.iter())
      .map(|(term, pct)| CurvePoint::new(*term, pct / 100.0))
      .collect();
    Self { points }
  }

  pub fn points(&self) -> &[CurvePoint] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn terms(&self) -> impl Iterator<Item = &str> {
    self.points.iter().map(|p| p.term.as_str())
  }

  pub fn position(&self, term: &str) -> Option<usize> {
    self.points.iter().position(|p| p.term == term)
  }

  pub fn rate(&self, term: &str) -> Option<f64> {
    self.points.iter().find(|p| p.term == term).map(|p| p.rate)
  }

  pub fn set_rate(&mut self, term: &str, rate: f64) -> Result<(), CurveError> {
    if !rate.is_finite() {
      return Err(CurveError::NonFinite(term.to_string()));
    }
    let point = self
      .points
      .iter_mut()
      .find(|p| p.term == term)
      .ok_or_else(|| CurveError::UnknownTerm(term.to_string()))?;
    point.rate = rate;
    Ok(())
  }

  /// Copy sorted by tenor length, unparseable labels last.
  pub fn ordered(&self) -> Self {
    let mut points = self.points.clone();
    points.sort_by(|a, b| compare_terms(&a.term, &b.term));
    Self { points }
  }

  /// Decimal when the first |rate| is below 1.0, percent otherwise.
  pub fn rate_scale(&self) -> RateScale {
    match self.points.first() {
      Some(p) if p.rate.abs() >= 1.0 => RateScale::Percent,
      _ => RateScale::Decimal,
    }
  }

  /// Checks every label parses and every rate is finite.
  pub fn validate(&self) -> Result<(), CurveError> {
    if self.points.is_empty() {
      return Err(CurveError::Empty);
    }
    for p in &self.points {
      p.term.parse::<Tenor>()?;
      if !p.rate.is_finite() {
        return Err(CurveError::NonFinite(p.term.clone()));
      }
    }
    Ok(())
  }
}

impl FromIterator<CurvePoint> for Curve {
  fn from_iter<I: IntoIterator<Item = CurvePoint>>(iter: I) -> Self {
    Self { points: iter.into_iter().collect() }
  }
}
