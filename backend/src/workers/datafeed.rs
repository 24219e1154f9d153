use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{emit, emit_error, CurveUpdate, EventSender, WorkerEvent, WorkerHandle, WorkerKind};
use crate::market::{
  datafeed::{MarketSimulator, SimParams, Tick},
  Curve,
};

pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 10_000;

#[derive(Debug)]
pub enum DatafeedCommand {
  Get,
  SimulateOnce,
  StartAuto { interval_ms: u64 },
  StopAuto,
  UpdateInterval { interval_ms: u64 },
  Reset,
  ApplyCurve(Curve),
}

pub fn clamp_interval(ms: u64) -> Duration {
  Duration::from_millis(ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS))
}

fn ticker(period: Duration) -> Interval {
  let mut interval = time::interval_at(Instant::now() + period, period);
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
  interval
}

async fn next_tick(ticker: &mut Option<Interval>) {
  match ticker {
    Some(interval) => {
      interval.tick().await;
    }
    None => std::future::pending().await,
  }
}

fn update(sim: &MarketSimulator, tick: Option<Tick>) -> WorkerEvent {
  WorkerEvent::Curve(CurveUpdate {
    curve: sim.snapshot(),
    moved_term: tick.as_ref().map(|t| t.term.clone()),
    dir: tick.map(|t| t.dir),
  })
}

/// Starts the market simulator worker seeded with `initial`.
pub fn spawn(initial: Curve, params: SimParams, events: EventSender) -> WorkerHandle<DatafeedCommand> {
  spawn_with(MarketSimulator::new(initial), params, events)
}

pub fn spawn_with(
  mut sim: MarketSimulator,
  params: SimParams,
  events: EventSender,
) -> WorkerHandle<DatafeedCommand> {
  let (handle, mut rx) = WorkerHandle::channel(WorkerKind::Datafeed);

  tokio::spawn(async move {
    if !emit(&events, WorkerEvent::Ready(WorkerKind::Datafeed)) {
      return;
    }
    let mut auto: Option<Interval> = None;
    let mut period = clamp_interval(DEFAULT_INTERVAL_MS);

    loop {
      tokio::select! {
        cmd = rx.recv() => {
          let Some(cmd) = cmd else { break };
          let event = match cmd {
            DatafeedCommand::Get => Some(update(&sim, None)),
            DatafeedCommand::SimulateOnce => match sim.simulate_tick(&params, None) {
              Ok(tick) => Some(update(&sim, Some(tick))),
              Err(e) => {
                emit_error(&events, WorkerKind::Datafeed, e);
                None
              }
            },
            DatafeedCommand::StartAuto { interval_ms } => {
              if auto.is_none() {
                period = clamp_interval(interval_ms);
                auto = Some(ticker(period));
                debug!(?period, "auto tick started");
              }
              None
            }
            DatafeedCommand::StopAuto => {
              auto = None;
              debug!("auto tick stopped");
              None
            }
            DatafeedCommand::UpdateInterval { interval_ms } => {
              period = clamp_interval(interval_ms);
              if auto.is_some() {
                auto = Some(ticker(period));
              }
              None
            }
            DatafeedCommand::Reset => {
              sim.reset();
              Some(update(&sim, None))
            }
            DatafeedCommand::ApplyCurve(curve) => match sim.apply_curve(curve) {
              Ok(tick) => {
                if auto.is_some() {
                  auto = Some(ticker(period));
                }
                Some(update(&sim, Some(tick)))
              }
              Err(e) => {
                emit_error(&events, WorkerKind::Datafeed, e);
                None
              }
            },
          };
          if let Some(event) = event {
            if !emit(&events, event) {
              break;
            }
          }
        }

        _ = next_tick(&mut auto) => {
          match sim.simulate_tick(&params, None) {
            Ok(tick) => {
              if !emit(&events, update(&sim, Some(tick))) {
                break;
              }
            }
            Err(e) => {
              // a failing tick stops auto mode until the client restarts it
              auto = None;
              emit_error(&events, WorkerKind::Datafeed, e);
            }
          }
        }
      }
    }
    info!("datafeed worker stopped");
  });

  handle
}
