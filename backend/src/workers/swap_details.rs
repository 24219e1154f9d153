use chrono::NaiveDate;
use tokio::task;
use tracing::{debug, info, warn};

use super::{emit, emit_error, EventSender, WorkerEvent, WorkerHandle, WorkerKind};
use crate::{
  analytics::{PricingError, SwapContext, SwapValuation},
  market::Curve,
  store::{FixingRecord, SwapRecord},
};

#[derive(Debug)]
pub enum SwapDetailsCommand {
  Open { swap: Box<SwapRecord>, market: Curve, valuation_date: NaiveDate, fixings: Vec<FixingRecord> },
  /// full revaluation of the open swap on a new curve
  Reval(Curve),
  FloatFixings(usize),
  Close,
}

type Priced = (Option<SwapContext>, Result<SwapValuation, PricingError>);

// pricing runs on the blocking pool; the context travels there and back
async fn price_off_thread<F>(f: F) -> Result<Priced, task::JoinError>
where
  F: FnOnce() -> Priced + Send + 'static,
{
  task::spawn_blocking(f).await
}

pub fn spawn(events: EventSender) -> WorkerHandle<SwapDetailsCommand> {
  let (handle, mut rx) = WorkerHandle::channel(WorkerKind::SwapDetails);

  tokio::spawn(async move {
    if !emit(&events, WorkerEvent::Ready(WorkerKind::SwapDetails)) {
      return;
    }
    let mut ctx: Option<SwapContext> = None;

    while let Some(cmd) = rx.recv().await {
      let (swap_id, priced) = match cmd {
        SwapDetailsCommand::Open { swap, market, valuation_date, fixings } => {
          debug!(swap_id = %swap.id, fixings = fixings.len(), "opening swap");
          ctx = None;
          let swap_id = swap.id.clone();
          let priced = price_off_thread(move || match SwapContext::new(&swap, market, valuation_date, &fixings) {
            Ok(c) => {
              let out = c.value();
              (Some(c), out)
            }
            Err(e) => (None, Err(e)),
          })
          .await;
          (swap_id, priced)
        }
        SwapDetailsCommand::Reval(market) => {
          let Some(mut c) = ctx.take() else {
            emit_error(&events, WorkerKind::SwapDetails, "no swap is open");
            continue;
          };
          let swap_id = c.id().to_string();
          let priced = price_off_thread(move || {
            let out = c.update_market(market).and_then(|_| c.value());
            (Some(c), out)
          })
          .await;
          (swap_id, priced)
        }
        SwapDetailsCommand::FloatFixings(index) => {
          let event = match ctx.as_ref().map(|c| (c.id().to_string(), c.float_fixings(index))) {
            Some((id, Ok(fixings))) => WorkerEvent::FloatFixings { id, fixings },
            Some((id, Err(e))) => WorkerEvent::SwapError { id, message: e.to_string() },
            None => WorkerEvent::Error { source: WorkerKind::SwapDetails, message: "no swap is open".into() },
          };
          if !emit(&events, event) {
            break;
          }
          continue;
        }
        SwapDetailsCommand::Close => {
          ctx = None;
          continue;
        }
      };

      let event = match priced {
        Ok((next, Ok(valuation))) => {
          ctx = next;
          WorkerEvent::SwapDetails { id: valuation.id.clone(), valuation: Box::new(valuation) }
        }
        Ok((next, Err(e))) => {
          ctx = next;
          warn!(%swap_id, error = %e, "swap pricing failed");
          WorkerEvent::SwapError { id: swap_id, message: e.to_string() }
        }
        Err(e) => WorkerEvent::SwapError { id: swap_id, message: format!("pricing task failed: {}", e) },
      };
      if !emit(&events, event) {
        break;
      }
    }
    info!("swap details worker stopped");
  });

  handle
}
