use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use rates_backend::{
  config::{AppConfig, ServerArgs},
  init_tracing, loader,
  midwares::app_state::AppState,
  route_handlers::build_router,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // a missing .env file is fine
  let _ = dotenvy::dotenv();
  init_tracing();

  let config = AppConfig::try_from(ServerArgs::parse()).context("invalid configuration")?;
  let bind_addr = config.bind_addr;
  info!(
    %bind_addr,
    store = if config.database_url.is_some() { "postgres" } else { "memory" },
    signed = config.auth.is_some(),
    "starting rates blotter server"
  );

  let state = AppState::from_config(config.clone()).await.context("store initialisation failed")?;

  if let Some(dir) = config.seed_csv_dir.as_deref() {
    match loader::load_dir(state.store.as_ref(), dir).await {
      Ok(report) => {
        for t in &report.tables {
          info!(table = t.table, raw = t.raw, inserted = t.inserted, invalid = t.invalid, "seeded");
        }
      }
      Err(e) => warn!(dir = %dir.display(), error = %e, "seeding from csv failed"),
    }
  }

  let app = build_router(state);
  let listener = TcpListener::bind(bind_addr).await.with_context(|| format!("failed to bind {}", bind_addr))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  info!("server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!("shutdown requested");
}
