//! Bulk load of the blotter tables from CSV exports.
//!
//! Files: main_tbl, risk_tbl, main_agg, risk_agg, fixings, cashflow_tbl and
//! cashflow_risk_tbl (`.csv`). Each file is optional. Rows that fail to parse
//! are counted and skipped; rows whose key already exists in the store are
//! skipped by the store.

use std::{
  collections::HashMap,
  fs::File,
  io::Read,
  path::{Path, PathBuf},
  time::Instant,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  market::RISK_TERMS,
  store::{
    AggRecord, BlotterStore, CashflowRecord, CashflowRiskRecord, FixingRecord, RiskRecord, StoreError, SwapRecord,
  },
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
  #[error("missing value for {0}")]
  MissingValue(&'static str),
  #[error("invalid number in {column}: {value:?}")]
  InvalidNumber { column: String, value: String },
  #[error("non finite number in {0}")]
  NonFinite(String),
  #[error("invalid boolean in {column}: {value:?}")]
  InvalidBool { column: String, value: String },
  #[error("invalid date in {column}: {value:?}")]
  InvalidDate { column: String, value: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("cannot open {path}: {source}")]
  Io { path: PathBuf, source: std::io::Error },
  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Outcome of loading one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
  pub table: &'static str,
  pub raw: usize,
  pub inserted: u64,
  pub invalid: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
  pub tables: Vec<TableReport>,
}

impl LoadReport {
  pub fn table(&self, name: &str) -> Option<&TableReport> {
    self.tables.iter().find(|t| t.table == name)
  }
}

pub struct Parsed<T> {
  pub rows: Vec<T>,
  pub raw: usize,
  pub invalid: usize,
}

pub fn parse_bool(s: &str) -> Option<bool> {
  match s.trim().to_lowercase().as_str() {
    "true" | "t" | "1" => Some(true),
    "false" | "f" | "0" => Some(false),
    _ => None,
  }
}

/// `YYYY-MM-DD`, an RFC3339 timestamp or `YYYY-MM-DD HH:MM:SS[.f]`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
  let s = s.trim();
  if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
    return Some(d);
  }
  if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
    return Some(ts.date_naive());
  }
  ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|ts| ts.date())
}

struct Row<'a> {
  columns: &'a HashMap<String, usize>,
  record: &'a StringRecord,
}

impl<'a> Row<'a> {
  // empty cells read as null
  fn cell(&self, column: &str) -> Option<&'a str> {
    let i = *self.columns.get(column)?;
    self.record.get(i).map(str::trim).filter(|s| !s.is_empty())
  }

  fn text(&self, column: &str) -> Option<String> {
    self.cell(column).map(str::to_string)
  }

  fn required(&self, column: &'static str) -> Result<String, ParseError> {
    self.text(column).ok_or(ParseError::MissingValue(column))
  }

  fn float(&self, column: &str) -> Result<Option<f64>, ParseError> {
    let Some(raw) = self.cell(column) else { return Ok(None) };
    let v: f64 = raw
      .parse()
      .map_err(|_| ParseError::InvalidNumber { column: column.to_string(), value: raw.to_string() })?;
    if !v.is_finite() {
      return Err(ParseError::NonFinite(column.to_string()));
    }
    Ok(Some(v))
  }

  fn int(&self, column: &str) -> Result<Option<i64>, ParseError> {
    let Some(raw) = self.cell(column) else { return Ok(None) };
    if let Ok(v) = raw.parse::<i64>() {
      return Ok(Some(v));
    }
    // exports sometimes write whole numbers as floats
    match self.float(column)? {
      Some(v) if v.fract() == 0.0 => Ok(Some(v as i64)),
      _ => Err(ParseError::InvalidNumber { column: column.to_string(), value: raw.to_string() }),
    }
  }

  fn bool(&self, column: &str) -> Result<Option<bool>, ParseError> {
    let Some(raw) = self.cell(column) else { return Ok(None) };
    parse_bool(raw)
      .map(Some)
      .ok_or_else(|| ParseError::InvalidBool { column: column.to_string(), value: raw.to_string() })
  }

  fn date(&self, column: &str) -> Result<Option<NaiveDate>, ParseError> {
    let Some(raw) = self.cell(column) else { return Ok(None) };
    parse_date(raw)
      .map(Some)
      .ok_or_else(|| ParseError::InvalidDate { column: column.to_string(), value: raw.to_string() })
  }

  fn deltas(&self) -> Result<Vec<f64>, ParseError> {
    RISK_TERMS
      .iter()
      .map(|term| {
        let prefixed = format!("c_{}", term);
        let column = if self.columns.contains_key(*term) { term.to_string() } else { prefixed };
        Ok(self.float(&column)?.unwrap_or(0.0))
      })
      .collect()
  }
}

fn swap_row(row: &Row) -> Result<SwapRecord, ParseError> {
  Ok(SwapRecord {
    id: row.required("ID")?,
    row_type: row.text("RowType"),
    counterparty_id: row.text("CounterpartyID"),
    start_date: row.date("StartDate")?,
    termination_date: row.date("TerminationDate")?,
    fixed_rate: row.float("FixedRate")?,
    npv: row.float("NPV")?,
    par_rate: row.float("ParRate")?,
    notional: row.int("Notional")?,
    swap_type: row.text("SwapType"),
    pay_fixed: row.bool("PayFixed")?,
  })
}

fn risk_row(row: &Row) -> Result<RiskRecord, ParseError> {
  Ok(RiskRecord {
    id: row.required("ID")?,
    row_type: row.text("RowType"),
    deltas: row.deltas()?,
    r: row.float("R")?,
    z: row.float("z")?,
  })
}

fn agg_row(row: &Row) -> Result<AggRecord, ParseError> {
  Ok(AggRecord { row_type: row.required("RowType")?, id: row.required("ID")?, npv: row.float("NPV")? })
}

fn fixing_row(row: &Row) -> Result<FixingRecord, ParseError> {
  let index_name = row.text("index_name").or_else(|| row.text("indexName")).ok_or(ParseError::MissingValue("index_name"))?;
  Ok(FixingRecord {
    index_name,
    date: row.date("date")?.ok_or(ParseError::MissingValue("date"))?,
    value: row.float("value")?.ok_or(ParseError::MissingValue("value"))?,
  })
}

fn cashflow_row(row: &Row) -> Result<CashflowRecord, ParseError> {
  Ok(CashflowRecord {
    counterparty_id: row.required("CounterpartyID")?,
    payment_date: row.date("PaymentDate")?.ok_or(ParseError::MissingValue("PaymentDate"))?,
    total_cashflow: row.float("TotalCashflow")?,
    total_weight: row.float("TotalWeight")?,
  })
}

fn cashflow_risk_row(row: &Row) -> Result<CashflowRiskRecord, ParseError> {
  Ok(CashflowRiskRecord {
    counterparty_id: row.required("CounterpartyID")?,
    payment_date: row.date("PaymentDate")?.ok_or(ParseError::MissingValue("PaymentDate"))?,
    deltas: row.deltas()?,
  })
}

fn parse_table<R, T>(reader: R, parse: fn(&Row) -> Result<T, ParseError>) -> Result<Parsed<T>, csv::Error>
where
  R: Read,
{
  let mut rdr = ReaderBuilder::new().trim(Trim::All).flexible(true).from_reader(reader);
  let columns: HashMap<String, usize> =
    rdr.headers()?.iter().enumerate().map(|(i, h)| (h.trim().to_string(), i)).collect();

  let mut parsed = Parsed { rows: Vec::new(), raw: 0, invalid: 0 };
  for (line, record) in rdr.records().enumerate() {
    parsed.raw += 1;
    let result = record
      .map_err(|e| e.to_string())
      .and_then(|record| parse(&Row { columns: &columns, record: &record }).map_err(|e| e.to_string()));
    match result {
      Ok(row) => parsed.rows.push(row),
      Err(e) => {
        parsed.invalid += 1;
        debug!(line = line + 2, error = %e, "skipping csv row");
      }
    }
  }
  Ok(parsed)
}

pub fn parse_swaps<R: Read>(reader: R) -> Result<Parsed<SwapRecord>, csv::Error> {
  parse_table(reader, swap_row)
}

pub fn parse_risk<R: Read>(reader: R) -> Result<Parsed<RiskRecord>, csv::Error> {
  parse_table(reader, risk_row)
}

pub fn parse_main_agg<R: Read>(reader: R) -> Result<Parsed<AggRecord>, csv::Error> {
  parse_table(reader, agg_row)
}

pub fn parse_fixings<R: Read>(reader: R) -> Result<Parsed<FixingRecord>, csv::Error> {
  parse_table(reader, fixing_row)
}

pub fn parse_cashflows<R: Read>(reader: R) -> Result<Parsed<CashflowRecord>, csv::Error> {
  parse_table(reader, cashflow_row)
}

pub fn parse_cashflow_risk<R: Read>(reader: R) -> Result<Parsed<CashflowRiskRecord>, csv::Error> {
  parse_table(reader, cashflow_risk_row)
}

fn open(dir: &Path, file: &str) -> Result<Option<File>, LoadError> {
  let path = dir.join(file);
  if !path.exists() {
    warn!(file, "skip: not found");
    return Ok(None);
  }
  File::open(&path).map(Some).map_err(|source| LoadError::Io { path, source })
}

fn report<T>(table: &'static str, parsed: &Parsed<T>, inserted: u64) -> TableReport {
  info!(table, raw = parsed.raw, inserted, invalid = parsed.invalid, "table loaded");
  TableReport { table, raw: parsed.raw, inserted, invalid: parsed.invalid }
}

/// Loads every known CSV found in `dir` into `store`.
pub async fn load_dir(store: &dyn BlotterStore, dir: &Path) -> Result<LoadReport, LoadError> {
  let start = Instant::now();
  let mut out = LoadReport::default();

  if let Some(f) = open(dir, "main_tbl.csv")? {
    let parsed = parse_swaps(f)?;
    let inserted = store.insert_swaps(&parsed.rows).await?;
    out.tables.push(report("main_tbl", &parsed, inserted));
  }
  if let Some(f) = open(dir, "risk_tbl.csv")? {
    let parsed = parse_risk(f)?;
    let inserted = store.insert_risk(&parsed.rows).await?;
    out.tables.push(report("risk_tbl", &parsed, inserted));
  }
  if let Some(f) = open(dir, "main_agg.csv")? {
    let parsed = parse_main_agg(f)?;
    let inserted = store.insert_main_agg(&parsed.rows).await?;
    out.tables.push(report("main_agg", &parsed, inserted));
  }
  if let Some(f) = open(dir, "risk_agg.csv")? {
    let parsed = parse_risk(f)?;
    let inserted = store.insert_risk_agg(&parsed.rows).await?;
    out.tables.push(report("risk_agg", &parsed, inserted));
  }
  if let Some(f) = open(dir, "fixings.csv")? {
    let parsed = parse_fixings(f)?;
    let inserted = store.insert_fixings(&parsed.rows).await?;
    out.tables.push(report("fixings", &parsed, inserted));
  }
  if let Some(f) = open(dir, "cashflow_tbl.csv")? {
    let parsed = parse_cashflows(f)?;
    let inserted = store.insert_cashflows(&parsed.rows).await?;
    out.tables.push(report("cashflow_tbl", &parsed, inserted));
  }
  if let Some(f) = open(dir, "cashflow_risk_tbl.csv")? {
    let parsed = parse_cashflow_risk(f)?;
    let inserted = store.insert_cashflow_risk(&parsed.rows).await?;
    out.tables.push(report("cashflow_risk_tbl", &parsed, inserted));
  }

  info!(dir = %dir.display(), tables = out.tables.len(), elapsed = ?start.elapsed(), "csv load complete");
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use std::fs;

  #[test]
  fn cell_parsers() {
    assert_eq!(parse_bool("T"), Some(true));
    assert_eq!(parse_bool("0"), Some(false));
    assert_eq!(parse_bool("yes"), None);

    let d = NaiveDate::from_ymd_opt(2024, 3, 15);
    assert_eq!(parse_date("2024-03-15"), d);
    assert_eq!(parse_date("2024-03-15T00:00:00.000Z"), d);
    assert_eq!(parse_date("2024-03-15 00:00:00"), d);
    assert_eq!(parse_date("15/03/2024"), None);
  }

  #[test]
  fn swaps_with_nulls_and_bad_rows() {
    let csv = "\
ID,RowType,CounterpartyID,StartDate,TerminationDate,FixedRate,NPV,ParRate,Notional,SwapType,PayFixed
S1,swap,CP1,2024-01-15,2029-01-15,4.1,1200.5,4.0,10000000,IRS,t
S2,,,,,,,,,,
S3,swap,CP2,2024-01-15,2029-01-15,abc,0,0,1,IRS,true
,swap,CP2,2024-01-15,2029-01-15,4.0,0,0,1,IRS,true
S4,swap,CP2,2024-01-15,2029-01-15,4.0,0,0,5e6,IRS,maybe
";
    let parsed = parse_swaps(csv.as_bytes()).unwrap();
    assert_eq!(parsed.raw, 5);
    assert_eq!(parsed.invalid, 3);
    assert_eq!(parsed.rows.len(), 2);

    let s1 = &parsed.rows[0];
    assert_eq!(s1.pay_fixed, Some(true));
    assert_eq!(s1.notional, Some(10_000_000));
    assert_eq!(s1.start_date, NaiveDate::from_ymd_opt(2024, 1, 15));

    let s2 = &parsed.rows[1];
    assert_eq!(s2.id, "S2");
    assert!(s2.row_type.is_none() && s2.npv.is_none() && s2.pay_fixed.is_none());
  }

  #[test]
  fn risk_columns_by_bucket_label() {
    let header: Vec<String> = ["ID".to_string()]
      .into_iter()
      .chain(RISK_TERMS.iter().map(|t| t.to_string()))
      .chain(["R".to_string(), "z".to_string(), "RowType".to_string()])
      .collect();
    let mut values = vec!["S1".to_string()];
    values.extend(RISK_TERMS.iter().map(|t| if *t == "5Y" { "42.5".to_string() } else { String::new() }));
    values.extend(["4100".to_string(), "".to_string(), "swap".to_string()]);
    let csv = format!("{}\n{}\n", header.join(","), values.join(","));

    let parsed = parse_risk(csv.as_bytes()).unwrap();
    let row = &parsed.rows[0];
    assert_eq!(row.delta("5Y"), Some(42.5));
    assert_eq!(row.delta("1W"), Some(0.0));
    assert_eq!(row.r, Some(4100.0));
    assert_eq!(row.z, None);
  }

  #[tokio::test]
  async fn loads_directory_and_skips_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
      dir.path().join("main_tbl.csv"),
      "ID,RowType,FixedRate,NPV\nS1,swap,4.0,10\nS2,swap,4.5,-3\nS1,swap,4.0,99\n",
    )
    .unwrap();
    fs::write(dir.path().join("main_agg.csv"), "RowType,ID,NPV\ncounterparty,CP1,7.5\nbook,,1\n").unwrap();
    fs::write(dir.path().join("fixings.csv"), "index_name,date,value\nsofr,2024-03-01,5.31\nsofr,2024-03-04,5.32\n")
      .unwrap();

    let store = MemoryStore::new();
    let report = load_dir(&store, dir.path()).await.unwrap();

    assert_eq!(report.table("main_tbl"), Some(&TableReport { table: "main_tbl", raw: 3, inserted: 2, invalid: 0 }));
    assert_eq!(report.table("main_agg").map(|t| (t.inserted, t.invalid)), Some((1, 1)));
    assert_eq!(report.table("fixings").map(|t| t.inserted), Some(2));
    assert!(report.table("risk_tbl").is_none());

    assert_eq!(store.swap_by_id("S1").await.unwrap().and_then(|s| s.npv), Some(10.0));
    assert_eq!(store.count_swaps().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn loads_counterparty_cashflows() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
      dir.path().join("cashflow_tbl.csv"),
      "CounterpartyID,PaymentDate,TotalCashflow,TotalWeight\n\
       CP1,2024-06-12,1000,0.5\n\
       CP1,2024-06-14T00:00:00Z,-250.5,\n\
       CP1,,10,1\n\
       CP2,2024-07-01,oops,1\n\
       CP1,2024-06-12,1,1\n",
    )
    .unwrap();
    fs::write(
      dir.path().join("cashflow_risk_tbl.csv"),
      "CounterpartyID,PaymentDate,c_1M,c_5Y\nCP1,2024-06-12,2,-1.5\n,2024-06-12,1,1\n",
    )
    .unwrap();

    let store = MemoryStore::new();
    let report = load_dir(&store, dir.path()).await.unwrap();
    assert_eq!(
      report.table("cashflow_tbl"),
      Some(&TableReport { table: "cashflow_tbl", raw: 5, inserted: 2, invalid: 2 })
    );
    assert_eq!(report.table("cashflow_risk_tbl").map(|t| (t.inserted, t.invalid)), Some((1, 1)));

    let from = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let flows = store.counterparty_cashflows("CP1", from).await.unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0].total_cashflow, Some(1000.0));
    assert_eq!(flows[1].payment_date, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap());
    assert_eq!(flows[1].total_weight, None);

    let risk = store.counterparty_cashflow_risk("CP1", from).await.unwrap();
    let i = RISK_TERMS.iter().position(|t| *t == "5Y").unwrap();
    assert_eq!(risk[0].deltas[i], -1.5);
    assert_eq!(risk[0].deltas[0], 0.0);
  }

  #[test]
  fn parse_errors_name_the_column() {
    let err = ParseError::InvalidNumber { column: "NPV".into(), value: "abc".into() };
    assert_eq!(err.to_string(), "invalid number in NPV: \"abc\"");
    assert_eq!(ParseError::MissingValue("ID").to_string(), "missing value for ID");
  }
}
