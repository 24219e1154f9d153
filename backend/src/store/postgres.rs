use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres, QueryBuilder, Row};
use tracing::info;

use super::{
  AggRecord, BlotterStore, CalibrationRecord, CashflowRecord, CashflowRiskRecord, FixingRecord, MarketSnapshot,
  PageQuery, RiskRecord, StoreError, SwapRecord,
};
use crate::market::{Curve, CurvePoint};

// bind parameter limit is 65535, keep chunks well below it
const INSERT_CHUNK: usize = 1000;

const SWAP_COLUMNS: &str = "id, row_type, counterparty_id, start_date, termination_date, fixed_rate, npv, par_rate, notional, swap_type, pay_fixed";

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
    info!("postgres pool initializing");

    let pool = PgPoolOptions::new().max_connections(max_connections).connect(db_url).await?;

    info!(max_connections, "created db pool");
    Self::init_tables(&pool).await?;

    Ok(Self { pool })
  }

  async fn init_tables(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(
      "
      CREATE TABLE IF NOT EXISTS main_tbl (
        id TEXT PRIMARY KEY,
        row_type TEXT,
        counterparty_id TEXT,
        start_date DATE,
        termination_date DATE,
        fixed_rate DOUBLE PRECISION,
        npv DOUBLE PRECISION,
        par_rate DOUBLE PRECISION,
        notional BIGINT,
        swap_type TEXT,
        pay_fixed BOOLEAN
      );
      CREATE TABLE IF NOT EXISTS risk_tbl (
        id TEXT NOT NULL,
        row_type TEXT NOT NULL DEFAULT '',
        deltas DOUBLE PRECISION[] NOT NULL,
        r DOUBLE PRECISION,
        z DOUBLE PRECISION,
        PRIMARY KEY (id, row_type)
      );
      CREATE TABLE IF NOT EXISTS main_agg (
        row_type TEXT NOT NULL,
        id TEXT NOT NULL,
        npv DOUBLE PRECISION,
        PRIMARY KEY (row_type, id)
      );
      CREATE TABLE IF NOT EXISTS risk_agg (
        id TEXT NOT NULL,
        row_type TEXT NOT NULL DEFAULT '',
        deltas DOUBLE PRECISION[] NOT NULL,
        r DOUBLE PRECISION,
        z DOUBLE PRECISION,
        PRIMARY KEY (id, row_type)
      );
      CREATE TABLE IF NOT EXISTS fixings (
        index_name TEXT NOT NULL,
        date DATE NOT NULL,
        value DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (index_name, date)
      );
      CREATE TABLE IF NOT EXISTS calibrations (
        id SERIAL PRIMARY KEY,
        curve_id TEXT NOT NULL,
        timestamp TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
        json JSONB NOT NULL
      );
      CREATE INDEX IF NOT EXISTS calibrations_curve_ts ON calibrations (curve_id, timestamp DESC);
      CREATE TABLE IF NOT EXISTS market_data (
        curve_id TEXT NOT NULL,
        quote_time TIMESTAMP WITH TIME ZONE NOT NULL,
        term TEXT NOT NULL,
        rate DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (curve_id, quote_time, term)
      );
      CREATE TABLE IF NOT EXISTS cashflows (
        counterparty_id TEXT NOT NULL,
        payment_date DATE NOT NULL,
        total_cashflow DOUBLE PRECISION,
        total_weight DOUBLE PRECISION,
        PRIMARY KEY (counterparty_id, payment_date)
      );
      CREATE TABLE IF NOT EXISTS cashflow_risk (
        counterparty_id TEXT NOT NULL,
        payment_date DATE NOT NULL,
        deltas DOUBLE PRECISION[] NOT NULL,
        PRIMARY KEY (counterparty_id, payment_date)
      );
      ",
    )
    .execute(pool)
    .await?;

    Ok(())
  }

  async fn insert_risk_rows(&self, table: &str, rows: &[RiskRecord]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("INSERT INTO {} (id, row_type, deltas, r, z) ", table));
      qb.push_values(chunk, |mut b, r| {
        b.push_bind(&r.id)
          .push_bind(r.row_type.clone().unwrap_or_default())
          .push_bind(&r.deltas)
          .push_bind(r.r)
          .push_bind(r.z);
      });
      qb.push(" ON CONFLICT DO NOTHING");
      inserted += qb.build().execute(&self.pool).await?.rows_affected();
    }
    Ok(inserted)
  }
}

fn risk_from_row(row: &sqlx::postgres::PgRow) -> Result<RiskRecord, sqlx::Error> {
  let row_type: String = row.try_get("row_type")?;
  Ok(RiskRecord {
    id: row.try_get("id")?,
    row_type: if row_type.is_empty() { None } else { Some(row_type) },
    deltas: row.try_get("deltas")?,
    r: row.try_get("r")?,
    z: row.try_get("z")?,
  })
}

#[async_trait]
impl BlotterStore for PgStore {
  async fn count_swaps(&self) -> Result<i64, StoreError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM main_tbl").fetch_one(&self.pool).await?;
    Ok(count)
  }

  async fn list_swaps(&self, query: &PageQuery) -> Result<Vec<SwapRecord>, StoreError> {
    // column and direction come from closed enums, never from raw input
    let sql = format!(
      "SELECT {} FROM main_tbl ORDER BY {} {} NULLS FIRST, id ASC LIMIT $1 OFFSET $2",
      SWAP_COLUMNS,
      query.sort_field.column(),
      query.sort_order.sql()
    );
    let rows = sqlx::query_as::<_, SwapRecord>(&sql)
      .bind(query.page_size as i64)
      .bind(query.offset() as i64)
      .fetch_all(&self.pool)
      .await?;
    Ok(rows)
  }

  async fn swap_by_id(&self, id: &str) -> Result<Option<SwapRecord>, StoreError> {
    let sql = format!("SELECT {} FROM main_tbl WHERE id = $1", SWAP_COLUMNS);
    Ok(sqlx::query_as::<_, SwapRecord>(&sql).bind(id).fetch_optional(&self.pool).await?)
  }

  async fn risk_by_id(&self, id: &str) -> Result<Vec<RiskRecord>, StoreError> {
    let rows = sqlx::query("SELECT id, row_type, deltas, r, z FROM risk_tbl WHERE id = $1")
      .bind(id)
      .fetch_all(&self.pool)
      .await?;
    Ok(rows.iter().map(risk_from_row).collect::<Result<_, _>>()?)
  }

  async fn risk_by_ids(&self, ids: &[String]) -> Result<Vec<RiskRecord>, StoreError> {
    let rows = sqlx::query("SELECT id, row_type, deltas, r, z FROM risk_tbl WHERE id = ANY($1)")
      .bind(ids)
      .fetch_all(&self.pool)
      .await?;
    Ok(rows.iter().map(risk_from_row).collect::<Result<_, _>>()?)
  }

  async fn main_agg(&self, id: &str, row_type: &str) -> Result<Option<AggRecord>, StoreError> {
    let row = sqlx::query_as::<_, AggRecord>("SELECT row_type, id, npv FROM main_agg WHERE id = $1 AND row_type = $2")
      .bind(id)
      .bind(row_type)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row)
  }

  async fn fixings(&self, index: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<FixingRecord>, StoreError> {
    let rows = sqlx::query_as::<_, FixingRecord>(
      "SELECT index_name, date, value FROM fixings WHERE index_name = $1 AND date >= $2 AND date <= $3 ORDER BY date ASC",
    )
    .bind(index)
    .bind(start)
    .bind(end)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn latest_calibration(&self, curve_id: &str) -> Result<Option<CalibrationRecord>, StoreError> {
    let row: Option<(String, DateTime<Utc>, Json<serde_json::Value>)> = sqlx::query_as(
      "SELECT curve_id, timestamp, json FROM calibrations WHERE curve_id = $1 ORDER BY timestamp DESC LIMIT 1",
    )
    .bind(curve_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row.map(|(curve_id, timestamp, Json(json))| CalibrationRecord { curve_id, timestamp, json }))
  }

  async fn save_calibration(&self, record: &CalibrationRecord) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO calibrations (curve_id, timestamp, json) VALUES ($1, $2, $3)")
      .bind(&record.curve_id)
      .bind(record.timestamp)
      .bind(Json(&record.json))
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn latest_market_data(&self, curve_id: &str) -> Result<Option<MarketSnapshot>, StoreError> {
    let latest: Option<(DateTime<Utc>,)> =
      sqlx::query_as("SELECT MAX(quote_time) FROM market_data WHERE curve_id = $1 HAVING COUNT(*) > 0")
        .bind(curve_id)
        .fetch_optional(&self.pool)
        .await?;
    let Some((quote_time,)) = latest else {
      return Ok(None);
    };

    // timestamps round-trip with microsecond precision, match on a one second window
    let rows: Vec<(String, f64)> = sqlx::query_as(
      "SELECT term, rate FROM market_data WHERE curve_id = $1 AND quote_time >= $2 AND quote_time < $3",
    )
    .bind(curve_id)
    .bind(quote_time)
    .bind(quote_time + Duration::seconds(1))
    .fetch_all(&self.pool)
    .await?;

    if rows.is_empty() {
      return Ok(None);
    }
    let curve: Curve = rows.into_iter().map(|(term, rate)| CurvePoint::new(term, rate)).collect();
    Ok(Some(MarketSnapshot { curve_id: curve_id.to_string(), quote_time, rows: curve.ordered() }))
  }

  async fn save_market_data(&self, snapshot: &MarketSnapshot) -> Result<(), StoreError> {
    if snapshot.rows.is_empty() {
      return Ok(());
    }
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO market_data (curve_id, quote_time, term, rate) ");
    qb.push_values(snapshot.rows.points(), |mut b, p| {
      b.push_bind(&snapshot.curve_id).push_bind(snapshot.quote_time).push_bind(&p.term).push_bind(p.rate);
    });
    qb.push(" ON CONFLICT DO NOTHING");
    qb.build().execute(&self.pool).await?;
    Ok(())
  }

  async fn counterparty_cashflows(&self, counterparty_id: &str, from: NaiveDate) -> Result<Vec<CashflowRecord>, StoreError> {
    let rows = sqlx::query_as::<_, CashflowRecord>(
      "SELECT counterparty_id, payment_date, total_cashflow, total_weight FROM cashflows WHERE counterparty_id = $1 AND payment_date >= $2",
    )
    .bind(counterparty_id)
    .bind(from)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn counterparty_cashflow_risk(
    &self,
    counterparty_id: &str,
    from: NaiveDate,
  ) -> Result<Vec<CashflowRiskRecord>, StoreError> {
    let rows = sqlx::query_as::<_, CashflowRiskRecord>(
      "SELECT counterparty_id, payment_date, deltas FROM cashflow_risk WHERE counterparty_id = $1 AND payment_date >= $2",
    )
    .bind(counterparty_id)
    .bind(from)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn insert_swaps(&self, rows: &[SwapRecord]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("INSERT INTO main_tbl ({}) ", SWAP_COLUMNS));
      qb.push_values(chunk, |mut b, s| {
        b.push_bind(&s.id)
          .push_bind(&s.row_type)
          .push_bind(&s.counterparty_id)
          .push_bind(s.start_date)
          .push_bind(s.termination_date)
          .push_bind(s.fixed_rate)
          .push_bind(s.npv)
          .push_bind(s.par_rate)
          .push_bind(s.notional)
          .push_bind(&s.swap_type)
          .push_bind(s.pay_fixed);
      });
      qb.push(" ON CONFLICT DO NOTHING");
      inserted += qb.build().execute(&self.pool).await?.rows_affected();
    }
    Ok(inserted)
  }

  async fn insert_risk(&self, rows: &[RiskRecord]) -> Result<u64, StoreError> {
    self.insert_risk_rows("risk_tbl", rows).await
  }

  async fn insert_main_agg(&self, rows: &[AggRecord]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO main_agg (row_type, id, npv) ");
      qb.push_values(chunk, |mut b, a| {
        b.push_bind(&a.row_type).push_bind(&a.id).push_bind(a.npv);
      });
      qb.push(" ON CONFLICT DO NOTHING");
      inserted += qb.build().execute(&self.pool).await?.rows_affected();
    }
    Ok(inserted)
  }

  async fn insert_risk_agg(&self, rows: &[RiskRecord]) -> Result<u64, StoreError> {
    self.insert_risk_rows("risk_agg", rows).await
  }

  async fn insert_fixings(&self, rows: &[FixingRecord]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO fixings (index_name, date, value) ");
      qb.push_values(chunk, |mut b, f| {
        b.push_bind(&f.index_name).push_bind(f.date).push_bind(f.value);
      });
      qb.push(" ON CONFLICT DO NOTHING");
      inserted += qb.build().execute(&self.pool).await?.rows_affected();
    }
    Ok(inserted)
  }

  async fn insert_cashflows(&self, rows: &[CashflowRecord]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO cashflows (counterparty_id, payment_date, total_cashflow, total_weight) ");
      qb.push_values(chunk, |mut b, c| {
        b.push_bind(&c.counterparty_id).push_bind(c.payment_date).push_bind(c.total_cashflow).push_bind(c.total_weight);
      });
      qb.push(" ON CONFLICT DO NOTHING");
      inserted += qb.build().execute(&self.pool).await?.rows_affected();
    }
    Ok(inserted)
  }

  async fn insert_cashflow_risk(&self, rows: &[CashflowRiskRecord]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for chunk in rows.chunks(INSERT_CHUNK) {
      let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO cashflow_risk (counterparty_id, payment_date, deltas) ");
      qb.push_values(chunk, |mut b, c| {
        b.push_bind(&c.counterparty_id).push_bind(c.payment_date).push_bind(&c.deltas);
      });
      qb.push(" ON CONFLICT DO NOTHING");
      inserted += qb.build().execute(&self.pool).await?.rows_affected();
    }
    Ok(inserted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use uuid::Uuid;

  // rows are namespaced with a fresh uuid per run
  async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
    PgStore::connect(&url, 2).await.unwrap()
  }

  fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
  }

  #[tokio::test]
  #[ignore] // Run with: DATABASE_URL=postgres://... cargo test --ignored reversed_fixing_range
  async fn reversed_fixing_range_is_empty() {
    let store = store().await;
    let index = format!("test-{}", Uuid::new_v4());
    let rows = vec![
      FixingRecord { index_name: index.clone(), date: day(3), value: 5.31 },
      FixingRecord { index_name: index.clone(), date: day(4), value: 5.32 },
    ];
    assert_eq!(store.insert_fixings(&rows).await.unwrap(), 2);
    assert_eq!(store.fixings(&index, day(3), day(4)).await.unwrap(), rows);
    assert!(store.fixings(&index, day(4), day(3)).await.unwrap().is_empty());
  }

  #[tokio::test]
  #[ignore] // Run with: DATABASE_URL=postgres://... cargo test --ignored cashflow_reload
  async fn cashflow_reload_skips_existing_rows() {
    let store = store().await;
    let cp = format!("CP-{}", Uuid::new_v4());
    let flows = vec![
      CashflowRecord { counterparty_id: cp.clone(), payment_date: day(12), total_cashflow: Some(10.0), total_weight: Some(1.0) },
      CashflowRecord { counterparty_id: cp.clone(), payment_date: day(14), total_cashflow: Some(-4.0), total_weight: None },
    ];
    assert_eq!(store.insert_cashflows(&flows).await.unwrap(), 2);
    assert_eq!(store.insert_cashflows(&flows).await.unwrap(), 0);
    assert_eq!(store.counterparty_cashflows(&cp, day(1)).await.unwrap().len(), 2);

    let risk = vec![CashflowRiskRecord { counterparty_id: cp.clone(), payment_date: day(12), deltas: vec![1.5; 31] }];
    assert_eq!(store.insert_cashflow_risk(&risk).await.unwrap(), 1);
    assert_eq!(store.insert_cashflow_risk(&risk).await.unwrap(), 0);
    assert_eq!(store.counterparty_cashflow_risk(&cp, day(1)).await.unwrap(), risk);
  }
}
