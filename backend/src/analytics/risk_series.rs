use serde::Serialize;
use serde_json::Value;

use crate::market::tenor::compare_terms;

const EXCLUDED_KEYS: [&str; 6] = ["r", "pricingtime", "z", "rowtype", "id", "__typename"];
const ZERO_EPS: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exposure {
  pub term: String,
  pub value: f64,
}

/// Non-zero bucket exposures in tenor order with their sum.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RiskSeries {
  pub exposures: Vec<Exposure>,
  pub dv01: f64,
}

impl RiskSeries {
  pub fn from_entries<'a, I>(entries: I) -> Self
  where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
  {
    let numeric = entries.into_iter().filter_map(|(key, value)| {
      let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
      };
      Some((key, v))
    });
    Self::from_values(numeric)
  }

  pub fn from_values<'a, I>(values: I) -> Self
  where
    I: IntoIterator<Item = (&'a str, f64)>,
  {
    let mut exposures: Vec<Exposure> = values
      .into_iter()
      .filter(|(key, _)| !EXCLUDED_KEYS.contains(&key.to_lowercase().as_str()))
      .filter(|(_, v)| v.is_finite() && v.abs() >= ZERO_EPS)
      .map(|(key, value)| Exposure { term: key.strip_prefix("c_").unwrap_or(key).to_string(), value })
      .collect();
    exposures.sort_by(|a, b| compare_terms(&a.term, &b.term));

    let dv01 = exposures.iter().map(|e| e.value).sum();
    Self { exposures, dv01 }
  }

  pub fn terms(&self) -> Vec<&str> {
    self.exposures.iter().map(|e| e.term.as_str()).collect()
  }
}
