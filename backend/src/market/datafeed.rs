use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{Curve, CurveError};

const MOVE_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct SimParams {
  /// weight on the shared AR(1) factor
  pub rho: f64,
  pub sigma_bps: f64,
  pub mean_revert: f64,
  /// slack allowed beyond the neighbour band
  pub margin_bps: f64,
}

impl Default for SimParams {
  fn default() -> Self {
    Self { rho: 0.9, sigma_bps: 5.0, mean_revert: 0.02, margin_bps: 3.0 }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  Up,
  Down,
  Flat,
}

impl Direction {
  fn between(prev: f64, next: f64) -> Self {
    if next > prev + MOVE_EPS {
      Self::Up
    } else if next < prev - MOVE_EPS {
      Self::Down
    } else {
      Self::Flat
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
  pub term: String,
  pub rate: f64,
  pub dir: Direction,
}

/// Random-walk market simulator moving one pillar per tick.
///
/// A persistent mean-reverting global factor correlates moves across pillars
/// and across time. Each move is clipped into the band spanned by the moved
/// pillar's neighbours so the curve keeps its rough shape.
pub struct MarketSimulator {
  initial: Curve,
  curve: Curve,
  global_factor: f64,
  rng: StdRng,
}

impl MarketSimulator {
  pub fn new(initial: Curve) -> Self {
    Self::with_rng(initial, StdRng::from_os_rng())
  }

  pub fn with_seed(initial: Curve, seed: u64) -> Self {
    Self::with_rng(initial, StdRng::seed_from_u64(seed))
  }

  fn with_rng(initial: Curve, rng: StdRng) -> Self {
    let initial = initial.ordered();
    Self { curve: initial.clone(), initial, global_factor: 0.0, rng }
  }

  pub fn snapshot(&self) -> Curve {
    self.curve.clone()
  }

  pub fn reset(&mut self) {
    self.curve = self.initial.clone();
    self.global_factor = 0.0;
  }

  /// Replaces the curve with a user edit and reports the first changed term.
  pub fn apply_curve(&mut self, curve: Curve) -> Result<Tick, CurveError> {
    let next = curve.ordered();
    let first = next.points().first().ok_or(CurveError::Empty)?.clone();

    let moved = next
      .points()
      .iter()
      .find(|p| match self.curve.rate(&p.term) {
        Some(prev) => (prev - p.rate).abs() > MOVE_EPS,
        None => true,
      })
      .cloned()
      .unwrap_or(first);

    self.curve = next;
    Ok(Tick { term: moved.term, rate: moved.rate, dir: Direction::Flat })
  }

  pub fn simulate_tick(&mut self, params: &SimParams, term: Option<&str>) -> Result<Tick, CurveError> {
    if self.curve.is_empty() {
      return Err(CurveError::Empty);
    }

    let i = match term {
      Some(t) => self.curve.position(t).ok_or_else(|| CurveError::UnknownTerm(t.to_string()))?,
      None => self.rng.random_range(0..self.curve.len()),
    };

    let shared: f64 = self.rng.sample(StandardNormal);
    self.global_factor = (1.0 - params.mean_revert) * self.global_factor + shared;

    let local: f64 = self.rng.sample(StandardNormal);
    let bp = self.curve.rate_scale().bp();
    let sigma = params.sigma_bps * bp;
    let shock = sigma * (params.rho * self.global_factor + (1.0 - params.rho * params.rho).max(0.0).sqrt() * local);

    let current = self.curve.points()[i].rate;
    let (lo, hi) = self.neighbour_band(i, params.margin_bps * bp);
    let next = round6((current + shock).clamp(lo, hi));

    let point = &self.curve.points()[i];
    let tick = Tick { term: point.term.clone(), rate: next, dir: Direction::between(current, next) };
    self.curve.set_rate(&tick.term, next)?;
    Ok(tick)
  }

  fn neighbour_band(&self, i: usize, margin: f64) -> (f64, f64) {
    let rates: Vec<f64> = self.curve.points().iter().map(|p| p.rate).collect();
    let n = rates.len();

    if n == 1 {
      return (rates[0] - margin, rates[0] + margin);
    }
    if i == 0 {
      return (rates[1] - margin, rates[1] + margin);
    }
    if i == n - 1 {
      return (rates[n - 2] - margin, rates[n - 2] + margin);
    }
    let (l, r) = (rates[i - 1], rates[i + 1]);
    (l.min(r) - margin, l.max(r) + margin)
  }
}

fn round6(x: f64) -> f64 {
  (x * 1e6).round() / 1e6
}
