//! Native rates analytics: curve bootstrap, swap pricing and the first order
//! approximations used to keep the blotter live between full revaluations.

pub mod approximation;
pub mod calibration;
pub mod cashflow_buckets;
pub mod discount;
pub mod risk_series;
pub mod swap_details;

pub use approximation::{approximate_swaps, md_changes, MdChange, SwapQuote};
pub use calibration::{bootstrap, calibrate, CalibratedCurve, CalibrationError};
pub use discount::DiscountCurve;
pub use risk_series::RiskSeries;
pub use swap_details::{PricingError, SwapContext, SwapValuation};
