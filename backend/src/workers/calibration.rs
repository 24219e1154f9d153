use chrono::NaiveDate;
use tokio::task;
use tracing::{info, warn};

use super::{emit, emit_error, EventSender, WorkerEvent, WorkerHandle, WorkerKind};
use crate::{
  analytics::calibrate,
  market::{dates::BusinessCalendar, Curve},
};

#[derive(Debug)]
pub enum CalibrationCommand {
  Calibrate(Curve),
}

/// Starts the calibration worker for curves valued on `valuation_date`.
pub fn spawn(valuation_date: NaiveDate, events: EventSender) -> WorkerHandle<CalibrationCommand> {
  let (handle, mut rx) = WorkerHandle::channel(WorkerKind::Calibration);

  tokio::spawn(async move {
    if !emit(&events, WorkerEvent::Ready(WorkerKind::Calibration)) {
      return;
    }

    while let Some(cmd) = rx.recv().await {
      let CalibrationCommand::Calibrate(mut market) = cmd;
      // only the newest queued curve matters
      while let Ok(CalibrationCommand::Calibrate(newer)) = rx.try_recv() {
        market = newer;
      }

      let result = task::spawn_blocking(move || calibrate(&market, valuation_date, &BusinessCalendar)).await;
      let delivered = match result {
        Ok(Ok(curves)) => emit(&events, WorkerEvent::Calibrated(Box::new(curves))),
        Ok(Err(e)) => {
          warn!(error = %e, "calibration failed");
          emit_error(&events, WorkerKind::Calibration, e)
        }
        Err(e) => emit_error(&events, WorkerKind::Calibration, format!("calibration task failed: {}", e)),
      };
      if !delivered {
        break;
      }
    }
    info!("calibration worker stopped");
  });

  handle
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::mpsc;
  use crate::market::CurvePoint;

  #[tokio::test]
  async fn calibrates_and_reports_errors() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let val = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let handle = spawn(val, tx);
    assert!(matches!(rx.recv().await, Some(WorkerEvent::Ready(WorkerKind::Calibration))));

    handle.post(CalibrationCommand::Calibrate(Curve::seed())).await;
    match rx.recv().await {
      Some(WorkerEvent::Calibrated(c)) => {
        assert_eq!(c.valuation_date, val);
        assert_eq!(c.discount.len(), 31);
      }
      other => panic!("unexpected {:?}", other),
    }

    handle.post(CalibrationCommand::Calibrate(Curve::new(vec![CurvePoint::new("XX", 0.05)]))).await;
    match rx.recv().await {
      Some(WorkerEvent::Error { source, message }) => {
        assert_eq!(source, WorkerKind::Calibration);
        assert!(message.contains("XX"));
      }
      other => panic!("unexpected {:?}", other),
    }
  }
}
