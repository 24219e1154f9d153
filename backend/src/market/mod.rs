pub mod curve;
pub mod datafeed;
pub mod dates;
pub mod tenor;

use thiserror::Error;

pub use curve::{Curve, CurvePoint, RateScale, RISK_TERMS};
pub use tenor::Tenor;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CurveError {
  #[error("invalid tenor label: {0}")]
  InvalidTenor(String),
  #[error("unknown term: {0}")]
  UnknownTerm(String),
  #[error("curve has no points")]
  Empty,
  #[error("rate for {0} is not finite")]
  NonFinite(String),
}
