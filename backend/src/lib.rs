pub mod analytics;
pub mod config;
pub mod loader;
pub mod market;
pub mod midwares;
pub mod route_handlers;
pub mod session;
pub mod store;
pub mod workers;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "info,rates_backend=debug";

/// Installs the global subscriber, filtered by `RUST_LOG` when set.
pub fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
  tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();
}
