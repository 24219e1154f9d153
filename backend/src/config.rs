use std::{net::SocketAddr, path::PathBuf};

use chrono::NaiveDate;
use clap::Parser;
use thiserror::Error;

use crate::workers::datafeed::{clamp_interval, DEFAULT_INTERVAL_MS};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid bind address {0:?}: {1}")]
  BindAddr(String, std::net::AddrParseError),
  #[error("invalid valuation date {0:?}, expected YYYY-MM-DD")]
  ValuationDate(String),
  #[error("DB_MAX_CONNECTIONS must be at least 1")]
  MaxConnections,
  #[error("EXPECTED_ORIGIN is required when HMAC_KEY is set")]
  MissingOrigin,
}

/// Command line / environment settings of the blotter server.
#[derive(Debug, Clone, Parser)]
#[command(name = "rates_backend", about = "Rates swap blotter server")]
pub struct ServerArgs {
  #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:7575")]
  pub bind_addr: String,

  /// Postgres connection string; the in-memory store is used when absent
  #[arg(long, env = "DATABASE_URL")]
  pub database_url: Option<String>,

  #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 8)]
  pub db_max_connections: u32,

  /// Directory of blotter CSVs loaded at startup
  #[arg(long, env = "SEED_CSV_DIR")]
  pub seed_csv_dir: Option<PathBuf>,

  #[arg(long, env = "VALUATION_DATE")]
  pub valuation_date: Option<String>,

  #[arg(long, env = "DEFAULT_TICK_MS", default_value_t = DEFAULT_INTERVAL_MS)]
  pub default_tick_ms: u64,

  #[arg(long, env = "HMAC_KEY", hide_env_values = true)]
  pub hmac_key: Option<String>,

  #[arg(long, env = "EXPECTED_ORIGIN")]
  pub expected_origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
  pub hmac_key: String,
  pub expected_origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
  pub bind_addr: SocketAddr,
  pub database_url: Option<String>,
  pub db_max_connections: u32,
  pub seed_csv_dir: Option<PathBuf>,
  pub valuation_date: Option<NaiveDate>,
  pub default_tick_ms: u64,
  pub auth: Option<AuthConfig>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      bind_addr: SocketAddr::from(([0, 0, 0, 0], 7575)),
      database_url: None,
      db_max_connections: 8,
      seed_csv_dir: None,
      valuation_date: None,
      default_tick_ms: DEFAULT_INTERVAL_MS,
      auth: None,
    }
  }
}

impl TryFrom<ServerArgs> for AppConfig {
  type Error = ConfigError;

  fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
    let bind_addr = args.bind_addr.parse().map_err(|e| ConfigError::BindAddr(args.bind_addr.clone(), e))?;

    let valuation_date = match args.valuation_date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
      Some(s) => Some(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ConfigError::ValuationDate(s.to_string()))?),
      None => None,
    };

    if args.db_max_connections == 0 {
      return Err(ConfigError::MaxConnections);
    }

    let auth = match args.hmac_key.filter(|k| !k.is_empty()) {
      Some(hmac_key) => {
        let expected_origin = args.expected_origin.filter(|o| !o.is_empty()).ok_or(ConfigError::MissingOrigin)?;
        Some(AuthConfig { hmac_key, expected_origin })
      }
      None => None,
    };

    Ok(Self {
      bind_addr,
      database_url: args.database_url.filter(|u| !u.is_empty()),
      db_max_connections: args.db_max_connections,
      seed_csv_dir: args.seed_csv_dir,
      valuation_date,
      default_tick_ms: clamp_interval(args.default_tick_ms).as_millis() as u64,
      auth,
    })
  }
}
