use tracing::{debug, info};

use super::{emit, EventSender, WorkerEvent, WorkerHandle, WorkerKind};
use crate::{
  analytics::{approximate_swaps, md_changes},
  market::Curve,
  store::{RiskRecord, SwapRecord},
};

#[derive(Debug)]
pub enum ApproxCommand {
  Curve(Curve),
  Swaps { swaps: Vec<SwapRecord>, risk: Vec<RiskRecord> },
}

/// State of the approximation worker. Changes are always measured against
/// `base`, the curve the stored NPVs and risk were produced on.
struct Approximator {
  base: Curve,
  curve: Option<Curve>,
  swaps: Vec<SwapRecord>,
  risk: Vec<RiskRecord>,
}

impl Approximator {
  fn try_approximate(&self) -> Option<WorkerEvent> {
    let curve = self.curve.as_ref()?;
    if self.swaps.is_empty() || self.risk.is_empty() {
      return None;
    }
    let changes = md_changes(&self.base, curve);
    let quotes = approximate_swaps(&self.swaps, &self.risk, &changes);
    debug!(rows = quotes.len(), "approx");
    Some(WorkerEvent::Approx(quotes))
  }
}

pub fn spawn(base: Curve, events: EventSender) -> WorkerHandle<ApproxCommand> {
  let (handle, mut rx) = WorkerHandle::channel(WorkerKind::Approximation);

  tokio::spawn(async move {
    if !emit(&events, WorkerEvent::Ready(WorkerKind::Approximation)) {
      return;
    }
    let mut state = Approximator { base: base.ordered(), curve: None, swaps: Vec::new(), risk: Vec::new() };

    while let Some(cmd) = rx.recv().await {
      let mut out = Vec::with_capacity(2);
      match cmd {
        ApproxCommand::Curve(curve) => {
          if curve.is_empty() {
            continue;
          }
          out.push(WorkerEvent::MdChanges(md_changes(&state.base, &curve)));
          state.curve = Some(curve);
        }
        ApproxCommand::Swaps { swaps, risk } => {
          state.swaps = swaps;
          state.risk = risk;
        }
      }
      out.extend(state.try_approximate());

      for event in out {
        if !emit(&events, event) {
          info!("approximation worker stopped");
          return;
        }
      }
    }
    info!("approximation worker stopped");
  });

  handle
}
