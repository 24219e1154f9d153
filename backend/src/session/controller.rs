use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

use chrono::{Days, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{ClientMessage, ServerMessage};
use crate::{
  analytics::{CalibratedCurve, SwapQuote},
  config::AppConfig,
  market::{datafeed::SimParams, Curve},
  store::{
    BlotterStore, CalibrationRecord, MarketSnapshot, PageQuery, StoreError, SwapRecord, SOFR_CURVE_ID, SOFR_INDEX,
  },
  workers::{
    approximation::{self, ApproxCommand},
    calibration::{self, CalibrationCommand},
    datafeed::{self, DatafeedCommand},
    swap_details::{self, SwapDetailsCommand},
    CurveUpdate, WorkerEvent, WorkerHandle, WorkerKind,
  },
};

const SESSION_SOURCE: &str = "session";
const STORE_SOURCE: &str = "store";
// one published fixing before the swap start is enough to forward fill from
const FIXING_LOOKBACK_DAYS: u64 = 10;

/// The client side of the session has gone away.
#[derive(Debug, Error)]
#[error("session client disconnected")]
pub struct SessionClosed;

type Flow = Result<(), SessionClosed>;

struct Workers {
  datafeed: WorkerHandle<DatafeedCommand>,
  calibration: WorkerHandle<CalibrationCommand>,
  approx: WorkerHandle<ApproxCommand>,
  details: WorkerHandle<SwapDetailsCommand>,
}

enum Input {
  Client(ClientMessage),
  Worker(WorkerEvent),
}

/// Page controller of one connected blotter client.
pub struct Session {
  id: String,
  store: Arc<dyn BlotterStore>,
  tick_ms: u64,
  valuation_date: NaiveDate,
  out: mpsc::Sender<ServerMessage>,
  events: mpsc::UnboundedReceiver<WorkerEvent>,
  workers: Workers,

  curve: Curve,
  curve_seen: bool,
  seq: u64,
  calibration_ready: bool,
  auto_calibrated: bool,

  page_ids: HashSet<String>,
  overrides: HashMap<String, SwapQuote>,
  open_swap: Option<String>,
}

fn calibration_date(record: &CalibrationRecord) -> Option<NaiveDate> {
  record.json.get("valuation_date").and_then(|v| serde_json::from_value(v.clone()).ok())
}

async fn resolve_valuation_date(store: &dyn BlotterStore, configured: Option<NaiveDate>) -> NaiveDate {
  match store.latest_calibration(SOFR_CURVE_ID).await {
    Ok(Some(record)) => {
      if let Some(date) = calibration_date(&record) {
        return date;
      }
      warn!(timestamp = %record.timestamp, "stored calibration has no valuation date");
    }
    Ok(None) => {}
    Err(e) => warn!(error = %e, "could not read latest calibration"),
  }
  configured.unwrap_or_else(|| Utc::now().date_naive())
}

async fn initial_curve(store: &dyn BlotterStore) -> Curve {
  match store.latest_market_data(SOFR_CURVE_ID).await {
    Ok(Some(snapshot)) if snapshot.rows.validate().is_ok() => snapshot.rows,
    Ok(_) => Curve::seed(),
    Err(e) => {
      warn!(error = %e, "could not read market data, using seed curve");
      Curve::seed()
    }
  }
}

fn with_override(mut row: SwapRecord, overrides: &HashMap<String, SwapQuote>) -> SwapRecord {
  if let Some(q) = overrides.get(&row.id) {
    row.npv = Some(q.npv);
    row.par_rate = Some(q.par_rate);
  }
  row
}

impl Session {
  /// Sets up workers, the first blotter page and auto ticking, then reports `ready`.
  pub async fn start(
    store: Arc<dyn BlotterStore>,
    config: &AppConfig,
    out: mpsc::Sender<ServerMessage>,
  ) -> Result<Self, SessionClosed> {
    let id = Uuid::new_v4().to_string();
    let valuation_date = resolve_valuation_date(store.as_ref(), config.valuation_date).await;
    let curve = initial_curve(store.as_ref()).await;
    info!(session = %id, %valuation_date, "session starting");

    let (event_tx, events) = mpsc::unbounded_channel();
    let workers = Workers {
      datafeed: datafeed::spawn(curve.clone(), SimParams::default(), event_tx.clone()),
      calibration: calibration::spawn(valuation_date, event_tx.clone()),
      approx: approximation::spawn(curve.clone(), event_tx.clone()),
      details: swap_details::spawn(event_tx),
    };

    let mut session = Self {
      id,
      store,
      tick_ms: config.default_tick_ms,
      valuation_date,
      out,
      events,
      workers,
      curve,
      curve_seen: false,
      seq: 0,
      calibration_ready: false,
      auto_calibrated: false,
      page_ids: HashSet::new(),
      overrides: HashMap::new(),
      open_swap: None,
    };

    session.send(ServerMessage::Ready).await?;
    session.post(&session.workers.datafeed, DatafeedCommand::Get).await?;
    session.load_page(PageQuery::default()).await?;
    session.post(&session.workers.datafeed, DatafeedCommand::StartAuto { interval_ms: session.tick_ms }).await?;
    Ok(session)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Runs until the client inbox closes or the client stops reading.
  pub async fn run(mut self, mut inbox: mpsc::Receiver<ClientMessage>) {
    loop {
      let input = tokio::select! {
        msg = inbox.recv() => msg.map(Input::Client),
        ev = self.events.recv() => ev.map(Input::Worker),
      };
      let flow = match input {
        Some(Input::Client(msg)) => self.on_client(msg).await,
        Some(Input::Worker(ev)) => self.on_worker(ev).await,
        None => break,
      };
      if flow.is_err() {
        break;
      }
    }
    info!(session = %self.id, "session closed");
  }

  async fn send(&self, msg: ServerMessage) -> Flow {
    self.out.send(msg).await.map_err(|_| SessionClosed)
  }

  async fn post<C: Send + 'static>(&self, handle: &WorkerHandle<C>, cmd: C) -> Flow {
    if !handle.post(cmd).await {
      self.send(ServerMessage::error(handle.kind().as_str(), "worker stopped")).await?;
    }
    Ok(())
  }

  async fn on_client(&mut self, msg: ClientMessage) -> Flow {
    debug!(session = %self.id, ?msg, "client message");
    match msg {
      ClientMessage::StartAuto { interval_ms } => {
        if let Some(ms) = interval_ms {
          self.tick_ms = datafeed::clamp_interval(ms).as_millis() as u64;
        }
        self.post(&self.workers.datafeed, DatafeedCommand::StartAuto { interval_ms: self.tick_ms }).await
      }
      ClientMessage::StopAuto => self.post(&self.workers.datafeed, DatafeedCommand::StopAuto).await,
      ClientMessage::UpdateInterval { interval_ms } => {
        self.tick_ms = datafeed::clamp_interval(interval_ms).as_millis() as u64;
        self.post(&self.workers.datafeed, DatafeedCommand::UpdateInterval { interval_ms }).await
      }
      ClientMessage::SimulateOnce => self.post(&self.workers.datafeed, DatafeedCommand::SimulateOnce).await,
      ClientMessage::Reset => self.post(&self.workers.datafeed, DatafeedCommand::Reset).await,
      ClientMessage::ApplyCurve { data } => self.post(&self.workers.datafeed, DatafeedCommand::ApplyCurve(data)).await,
      ClientMessage::EditRate { term, rate } => {
        let mut curve = self.curve.clone();
        match curve.set_rate(&term, rate) {
          Ok(()) => self.post(&self.workers.datafeed, DatafeedCommand::ApplyCurve(curve)).await,
          Err(e) => self.send(ServerMessage::error(SESSION_SOURCE, e)).await,
        }
      }
      ClientMessage::Recalibrate => self.calibrate().await,
      ClientMessage::Blotter { page, page_size, sort_field, sort_order } => {
        match PageQuery::parse(Some(page), Some(page_size), sort_field.as_deref(), sort_order.as_deref()) {
          Ok(query) => self.load_page(query).await,
          Err(e) => self.send(ServerMessage::error(SESSION_SOURCE, e)).await,
        }
      }
      ClientMessage::OpenSwap { id } => self.open_swap(id).await,
      ClientMessage::CloseSwap => {
        self.open_swap = None;
        self.post(&self.workers.details, SwapDetailsCommand::Close).await
      }
      ClientMessage::FullReval => match self.open_swap {
        Some(_) => self.post(&self.workers.details, SwapDetailsCommand::Reval(self.curve.clone())).await,
        None => self.send(ServerMessage::error(SESSION_SOURCE, "no swap is open")).await,
      },
      ClientMessage::FloatFixings { index } => match self.open_swap {
        Some(_) => self.post(&self.workers.details, SwapDetailsCommand::FloatFixings(index.unwrap_or(0))).await,
        None => self.send(ServerMessage::error(SESSION_SOURCE, "no swap is open")).await,
      },
      ClientMessage::Ping => self.send(ServerMessage::Pong).await,
    }
  }

  async fn on_worker(&mut self, event: WorkerEvent) -> Flow {
    match event {
      WorkerEvent::Ready(kind) => {
        debug!(session = %self.id, worker = kind.as_str(), "worker ready");
        if kind == WorkerKind::Calibration {
          self.calibration_ready = true;
          self.maybe_auto_calibrate().await?;
        }
        Ok(())
      }
      WorkerEvent::Error { source, message } => {
        warn!(session = %self.id, worker = source.as_str(), %message, "worker error");
        self.send(ServerMessage::error(source.as_str(), message)).await
      }
      WorkerEvent::SwapError { id, message } => {
        if self.open_swap.as_deref() != Some(id.as_str()) {
          debug!(session = %self.id, swap_id = %id, %message, "dropping stale swap error");
          return Ok(());
        }
        warn!(session = %self.id, swap_id = %id, %message, "swap pricing error");
        self.send(ServerMessage::error(WorkerKind::SwapDetails.as_str(), message)).await
      }
      WorkerEvent::Curve(update) => self.on_curve(update).await,
      WorkerEvent::MdChanges(rows) => self.send(ServerMessage::MdChanges { rows }).await,
      WorkerEvent::Approx(quotes) => self.on_approx(quotes).await,
      WorkerEvent::Calibrated(curves) => {
        self
          .send(ServerMessage::Curves {
            discount: curves.discount.clone(),
            zero: curves.zero.clone(),
            forward: curves.forward.clone(),
          })
          .await?;
        self.persist_calibration(&curves).await
      }
      WorkerEvent::SwapDetails { id, valuation } => {
        if self.open_swap.as_deref() != Some(id.as_str()) {
          debug!(session = %self.id, swap_id = %id, "dropping stale swap details");
          return Ok(());
        }
        self.send(ServerMessage::SwapDetails(valuation)).await
      }
      WorkerEvent::FloatFixings { id, fixings } => {
        if self.open_swap.as_deref() != Some(id.as_str()) {
          debug!(session = %self.id, swap_id = %id, "dropping stale float fixings");
          return Ok(());
        }
        self.send(ServerMessage::FloatFixings(fixings)).await
      }
    }
  }

  async fn on_curve(&mut self, update: CurveUpdate) -> Flow {
    self.seq += 1;
    self.curve = update.curve.clone();
    self.curve_seen = true;
    self
      .send(ServerMessage::Curve {
        data: update.curve.clone(),
        moved_term: update.moved_term,
        dir: update.dir,
        seq: self.seq,
      })
      .await?;
    self.post(&self.workers.approx, ApproxCommand::Curve(update.curve)).await?;
    self.maybe_auto_calibrate().await
  }

  async fn on_approx(&mut self, quotes: Vec<SwapQuote>) -> Flow {
    // replies computed for an earlier page are discarded
    let rows: Vec<SwapQuote> = quotes.into_iter().filter(|q| self.page_ids.contains(&q.id)).collect();
    for q in &rows {
      self.overrides.insert(q.id.clone(), q.clone());
    }

    if let Some(open) = self.open_swap.as_deref() {
      if let Some(q) = rows.iter().find(|q| q.id == open) {
        let live = ServerMessage::SwapLive { id: q.id.clone(), npv: q.npv, par_rate: q.par_rate };
        self.send(live).await?;
      }
    }
    self.send(ServerMessage::Approx { rows }).await
  }

  async fn maybe_auto_calibrate(&mut self) -> Flow {
    if self.auto_calibrated || !self.calibration_ready || !self.curve_seen {
      return Ok(());
    }
    self.auto_calibrated = true;
    self.calibrate().await
  }

  async fn calibrate(&self) -> Flow {
    self.send(ServerMessage::Calibrating).await?;
    self.post(&self.workers.calibration, CalibrationCommand::Calibrate(self.curve.clone())).await
  }

  async fn persist_calibration(&self, curves: &CalibratedCurve) -> Flow {
    let now = Utc::now();
    let saved = async {
      let json = serde_json::to_value(curves)?;
      let record = CalibrationRecord { curve_id: SOFR_CURVE_ID.to_string(), timestamp: now, json };
      self.store.save_calibration(&record).await?;
      let snapshot = MarketSnapshot { curve_id: SOFR_CURVE_ID.to_string(), quote_time: now, rows: curves.market.clone() };
      self.store.save_market_data(&snapshot).await
    }
    .await;

    if let Err(e) = saved {
      warn!(session = %self.id, error = %e, "could not persist calibration");
      self.send(ServerMessage::error(STORE_SOURCE, e)).await?;
    }
    Ok(())
  }

  async fn load_page(&mut self, query: PageQuery) -> Flow {
    let loaded = async {
      let total = self.store.count_swaps().await?;
      let rows = self.store.list_swaps(&query).await?;
      let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
      let risk = self.store.risk_by_ids(&ids).await?;
      Ok::<_, StoreError>((total, rows, risk))
    }
    .await;

    let (total, rows, risk) = match loaded {
      Ok(v) => v,
      Err(e) => {
        warn!(session = %self.id, error = %e, "blotter page failed");
        return self.send(ServerMessage::error(STORE_SOURCE, e)).await;
      }
    };
    debug!(session = %self.id, page = query.page, rows = rows.len(), total, "blotter page");

    self.page_ids = rows.iter().map(|r| r.id.clone()).collect();
    self.overrides.retain(|id, _| self.page_ids.contains(id));

    let merged = rows.iter().cloned().map(|r| with_override(r, &self.overrides)).collect();
    self
      .send(ServerMessage::BlotterPage { total, page: query.page, page_size: query.page_size, rows: merged })
      .await?;
    self.post(&self.workers.approx, ApproxCommand::Swaps { swaps: rows, risk }).await
  }

  async fn open_swap(&mut self, id: String) -> Flow {
    let loaded = async {
      let swap = self.store.swap_by_id(&id).await?;
      let risk = self.store.risk_by_id(&id).await?;
      Ok::<_, StoreError>((swap, risk))
    }
    .await;

    let (swap, risk) = match loaded {
      Ok((Some(swap), risk)) => (swap, risk),
      Ok((None, _)) => return self.send(ServerMessage::error(SESSION_SOURCE, format!("swap {} not found", id))).await,
      Err(e) => return self.send(ServerMessage::error(STORE_SOURCE, e)).await,
    };

    let val = self.valuation_date;
    let from = swap.start_date.unwrap_or(val).min(val);
    let from = from.checked_sub_days(Days::new(FIXING_LOOKBACK_DAYS)).unwrap_or(from);
    let fixings = match self.store.fixings(SOFR_INDEX, from, val).await {
      Ok(rows) => rows,
      Err(e) => {
        self.send(ServerMessage::error(STORE_SOURCE, e)).await?;
        Vec::new()
      }
    };
    info!(session = %self.id, swap_id = %id, fixings = fixings.len(), "swap opened");

    self.open_swap = Some(swap.id.clone());
    let risk_row = risk.into_iter().next();
    self
      .send(ServerMessage::SwapOpened { swap: with_override(swap.clone(), &self.overrides), risk_row })
      .await?;
    let cmd = SwapDetailsCommand::Open {
      swap: Box::new(swap),
      market: self.curve.clone(),
      valuation_date: val,
      fixings,
    };
    self.post(&self.workers.details, cmd).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    market::RISK_TERMS,
    store::{MemoryStore, RiskRecord},
  };
  use std::time::Duration;
  use tokio::time::timeout;

  fn swap(id: &str, npv: f64) -> SwapRecord {
    SwapRecord {
      id: id.into(),
      row_type: Some("swap".into()),
      counterparty_id: Some("CP1".into()),
      start_date: NaiveDate::from_ymd_opt(2024, 1, 15),
      termination_date: NaiveDate::from_ymd_opt(2029, 1, 15),
      fixed_rate: Some(4.0),
      npv: Some(npv),
      par_rate: Some(4.0),
      notional: Some(10_000_000),
      swap_type: Some("IRS".into()),
      pay_fixed: Some(true),
    }
  }

  fn risk_10y(id: &str, delta: f64) -> RiskRecord {
    let mut deltas = vec![0.0; RISK_TERMS.len()];
    deltas[RISK_TERMS.iter().position(|t| *t == "10Y").unwrap()] = delta;
    RiskRecord { id: id.into(), row_type: None, deltas, r: Some(4_000.0), z: None }
  }

  async fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.insert_swaps(&[swap("S2", 250.0), swap("S1", 100.0), swap("S3", -40.0)]).await.unwrap();
    store.insert_risk(&[risk_10y("S1", 5.0), risk_10y("S2", -2.0)]).await.unwrap();
    Arc::new(store)
  }

  fn config() -> AppConfig {
    AppConfig { valuation_date: NaiveDate::from_ymd_opt(2024, 6, 3), ..AppConfig::default() }
  }

  async fn launch(store: Arc<MemoryStore>) -> (mpsc::Sender<ClientMessage>, mpsc::Receiver<ServerMessage>) {
    let (out_tx, out_rx) = mpsc::channel(1024);
    let (in_tx, in_rx) = mpsc::channel(16);
    let session = Session::start(store, &config(), out_tx).await.unwrap();
    tokio::spawn(session.run(in_rx));
    (in_tx, out_rx)
  }

  async fn wait_for<F>(rx: &mut mpsc::Receiver<ServerMessage>, mut pred: F) -> ServerMessage
  where
    F: FnMut(&ServerMessage) -> bool,
  {
    timeout(Duration::from_secs(20), async {
      loop {
        let msg = rx.recv().await.expect("session alive");
        if pred(&msg) {
          return msg;
        }
      }
    })
    .await
    .expect("message in time")
  }

  #[tokio::test]
  async fn startup_sends_page_curve_and_calibrates_once() {
    let store = seeded_store().await;
    let (_in, mut out) = launch(store.clone()).await;

    assert_eq!(out.recv().await, Some(ServerMessage::Ready));
    match out.recv().await {
      Some(ServerMessage::BlotterPage { total, page, page_size, rows }) => {
        assert_eq!((total, page, page_size), (3, 0, 20));
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["S1", "S2", "S3"]);
      }
      other => panic!("unexpected {:?}", other),
    }

    match wait_for(&mut out, |m| matches!(m, ServerMessage::Curve { .. })).await {
      ServerMessage::Curve { data, seq, .. } => {
        assert_eq!(seq, 1);
        assert_eq!(data, Curve::seed());
      }
      _ => unreachable!(),
    }

    match wait_for(&mut out, |m| matches!(m, ServerMessage::Curves { .. })).await {
      ServerMessage::Curves { discount, .. } => assert_eq!(discount.len(), 31),
      _ => unreachable!(),
    }
    // persisted right after the reply went out
    let saved = timeout(Duration::from_secs(5), async {
      loop {
        if let Some(rec) = store.latest_calibration(SOFR_CURVE_ID).await.unwrap() {
          return rec;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
      }
    })
    .await
    .unwrap();
    assert_eq!(calibration_date(&saved), NaiveDate::from_ymd_opt(2024, 6, 3));
    assert!(store.latest_market_data(SOFR_CURVE_ID).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn edits_flow_into_overrides_and_next_page() {
    let store = seeded_store().await;
    let (tx, mut out) = launch(store).await;

    tx.send(ClientMessage::StopAuto).await.unwrap();
    let ten_y = Curve::seed().rate("10Y").unwrap() + 0.01;
    tx.send(ClientMessage::EditRate { term: "10Y".into(), rate: ten_y }).await.unwrap();

    // S1 carries 5 per bp at 10Y: +100bp moves it by 500
    let approx = wait_for(&mut out, |m| match m {
      ServerMessage::Approx { rows } => rows.iter().any(|q| q.id == "S1" && (q.npv - 600.0).abs() < 1e-6),
      _ => false,
    })
    .await;
    if let ServerMessage::Approx { rows } = approx {
      assert_eq!(rows.len(), 2, "S3 has no risk row");
      let s2 = rows.iter().find(|q| q.id == "S2").unwrap();
      assert!((s2.npv - 50.0).abs() < 1e-6);
    }

    tx.send(ClientMessage::Blotter { page: 0, page_size: 20, sort_field: Some("NPV".into()), sort_order: Some("desc".into()) })
      .await
      .unwrap();
    match wait_for(&mut out, |m| matches!(m, ServerMessage::BlotterPage { .. })).await {
      ServerMessage::BlotterPage { rows, .. } => {
        // ordered by stored NPV, shown with the live values
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["S2", "S1", "S3"]);
        assert!((rows[0].npv.unwrap() - 50.0).abs() < 1e-6);
        assert!((rows[1].npv.unwrap() - 600.0).abs() < 1e-6);
        assert_eq!(rows[2].npv, Some(-40.0));
      }
      _ => unreachable!(),
    }
  }

  #[tokio::test]
  async fn swap_view_lifecycle() {
    let store = seeded_store().await;
    let (tx, mut out) = launch(store).await;

    tx.send(ClientMessage::OpenSwap { id: "S2".into() }).await.unwrap();
    match wait_for(&mut out, |m| matches!(m, ServerMessage::SwapOpened { .. })).await {
      ServerMessage::SwapOpened { swap, risk_row } => {
        assert_eq!(swap.id, "S2");
        assert_eq!(risk_row.map(|r| r.id), Some("S2".to_string()));
      }
      _ => unreachable!(),
    }
    match wait_for(&mut out, |m| matches!(m, ServerMessage::SwapDetails(_))).await {
      ServerMessage::SwapDetails(v) => {
        assert_eq!(v.id, "S2");
        assert_eq!(v.valuation_date, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
      }
      _ => unreachable!(),
    }

    tx.send(ClientMessage::FloatFixings { index: None }).await.unwrap();
    match wait_for(&mut out, |m| matches!(m, ServerMessage::FloatFixings(_))).await {
      ServerMessage::FloatFixings(f) => assert_eq!(f.index, 0),
      _ => unreachable!(),
    }

    tx.send(ClientMessage::CloseSwap).await.unwrap();
    tx.send(ClientMessage::FullReval).await.unwrap();
    match wait_for(&mut out, |m| matches!(m, ServerMessage::Error { .. })).await {
      ServerMessage::Error { source, message } => {
        assert_eq!(source, "session");
        assert!(message.contains("no swap"));
      }
      _ => unreachable!(),
    }
  }

  #[tokio::test]
  async fn bad_requests_do_not_end_the_session() {
    let store = seeded_store().await;
    let (tx, mut out) = launch(store).await;

    tx.send(ClientMessage::Blotter { page: 0, page_size: 20, sort_field: Some("colour".into()), sort_order: None })
      .await
      .unwrap();
    tx.send(ClientMessage::OpenSwap { id: "NOPE".into() }).await.unwrap();
    tx.send(ClientMessage::EditRate { term: "13Y".into(), rate: 0.04 }).await.unwrap();
    for _ in 0..3 {
      let msg = wait_for(&mut out, |m| matches!(m, ServerMessage::Error { .. })).await;
      assert!(matches!(msg, ServerMessage::Error { ref source, .. } if source == "session"));
    }

    tx.send(ClientMessage::Ping).await.unwrap();
    assert_eq!(wait_for(&mut out, |m| matches!(m, ServerMessage::Pong)).await, ServerMessage::Pong);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn ping_is_answered_after_a_tick_burst() {
    let store = seeded_store().await;
    let (tx, mut out) = launch(store).await;

    let reader = tokio::spawn(async move {
      while let Some(msg) = out.recv().await {
        if msg == ServerMessage::Pong {
          return true;
        }
      }
      false
    });

    let burst = async {
      tx.send(ClientMessage::StopAuto).await.unwrap();
      for _ in 0..3000 {
        tx.send(ClientMessage::SimulateOnce).await.unwrap();
      }
      tx.send(ClientMessage::Ping).await.unwrap();
    };
    timeout(Duration::from_secs(60), burst).await.expect("session kept reading its inbox");
    let answered = timeout(Duration::from_secs(60), reader).await.expect("pong in time").unwrap();
    assert!(answered);
  }

  #[tokio::test]
  async fn swap_errors_for_other_swaps_are_dropped() {
    let store = seeded_store().await;
    let (out_tx, mut out) = mpsc::channel(64);
    let mut session = Session::start(store, &config(), out_tx).await.unwrap();
    assert_eq!(out.recv().await, Some(ServerMessage::Ready));
    assert!(matches!(out.recv().await, Some(ServerMessage::BlotterPage { .. })));

    session.open_swap = Some("S2".into());
    session.on_worker(WorkerEvent::SwapError { id: "S1".into(), message: "stale".into() }).await.unwrap();
    assert!(out.try_recv().is_err());

    session.on_worker(WorkerEvent::SwapError { id: "S2".into(), message: "boom".into() }).await.unwrap();
    match out.try_recv() {
      Ok(ServerMessage::Error { source, message }) => {
        assert_eq!(source, "swap_details");
        assert_eq!(message, "boom");
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[tokio::test]
  async fn start_auto_interval_is_remembered() {
    let store = seeded_store().await;
    let (out_tx, _out) = mpsc::channel(64);
    let mut session = Session::start(store, &config(), out_tx).await.unwrap();
    assert_eq!(session.tick_ms, 1000);

    session.on_client(ClientMessage::StartAuto { interval_ms: Some(250) }).await.unwrap();
    assert_eq!(session.tick_ms, 250);
    session.on_client(ClientMessage::StartAuto { interval_ms: None }).await.unwrap();
    assert_eq!(session.tick_ms, 250);
    session.on_client(ClientMessage::StartAuto { interval_ms: Some(60_000) }).await.unwrap();
    assert_eq!(session.tick_ms, 10_000);
  }
}
