//! Long-lived background workers owned by a blotter session.
//!
//! Each worker is a tokio task with its own bounded mailbox. Replies go to a
//! single unbounded event channel the session drains. Emitting never waits,
//! so a worker always gets back to its mailbox and a session blocked on a
//! full mailbox is eventually let through.

pub mod approximation;
pub mod calibration;
pub mod datafeed;
pub mod swap_details;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
  analytics::{swap_details::FloatFixings, CalibratedCurve, MdChange, SwapQuote, SwapValuation},
  market::{datafeed::Direction, Curve},
};

const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
  Datafeed,
  Calibration,
  Approximation,
  SwapDetails,
}

impl WorkerKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Datafeed => "datafeed",
      Self::Calibration => "calibration",
      Self::Approximation => "approximation",
      Self::SwapDetails => "swap_details",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurveUpdate {
  pub curve: Curve,
  pub moved_term: Option<String>,
  pub dir: Option<Direction>,
}

#[derive(Debug)]
pub enum WorkerEvent {
  Ready(WorkerKind),
  Error { source: WorkerKind, message: String },
  /// failure while pricing a specific swap
  SwapError { id: String, message: String },
  Curve(CurveUpdate),
  MdChanges(Vec<MdChange>),
  Approx(Vec<SwapQuote>),
  Calibrated(Box<CalibratedCurve>),
  SwapDetails { id: String, valuation: Box<SwapValuation> },
  FloatFixings { id: String, fixings: FloatFixings },
}

/// Mailbox of a running worker. Dropping it stops the worker.
pub struct WorkerHandle<C> {
  kind: WorkerKind,
  inbox: mpsc::Sender<C>,
}

impl<C: Send + 'static> WorkerHandle<C> {
  fn channel(kind: WorkerKind) -> (Self, mpsc::Receiver<C>) {
    let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
    (Self { kind, inbox }, rx)
  }

  pub fn kind(&self) -> WorkerKind {
    self.kind
  }

  /// Queues a command; false once the worker has exited.
  pub async fn post(&self, cmd: C) -> bool {
    if self.inbox.send(cmd).await.is_err() {
      warn!(worker = ?self.kind, "worker inbox closed");
      return false;
    }
    true
  }
}

pub type EventSender = mpsc::UnboundedSender<WorkerEvent>;

// false when the session side has gone away
fn emit(events: &EventSender, event: WorkerEvent) -> bool {
  events.send(event).is_ok()
}

fn emit_error(events: &EventSender, source: WorkerKind, message: impl ToString) -> bool {
  emit(events, WorkerEvent::Error { source, message: message.to_string() })
}
