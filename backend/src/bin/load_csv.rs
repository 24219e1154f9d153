use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use rates_backend::{init_tracing, loader, store::PgStore};

/// Loads the blotter CSV exports into Postgres.
#[derive(Debug, Parser)]
#[command(name = "load_csv")]
struct Args {
  /// Directory holding the blotter, risk, aggregate, fixing and cashflow CSV exports
  #[arg(long, default_value = ".migrate_csv")]
  dir: PathBuf,

  #[arg(long, env = "DATABASE_URL")]
  database_url: String,

  #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 8)]
  db_max_connections: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let _ = dotenvy::dotenv();
  init_tracing();
  let args = Args::parse();

  if !args.dir.is_dir() {
    bail!("{} is not a directory", args.dir.display());
  }

  let store = PgStore::connect(&args.database_url, args.db_max_connections).await.context("connecting to postgres")?;
  let report = loader::load_dir(&store, &args.dir).await.context("loading csv files")?;

  for t in &report.tables {
    println!("{}: raw {} inserted {} invalid {}", t.table, t.raw, t.inserted, t.invalid);
  }
  Ok(())
}
