pub mod api;
pub mod sockets;

use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::midwares::{app_state::AppState, auth};

/// All routes; `/health` stays reachable without a signature.
pub fn build_router(state: AppState) -> Router {
  Router::new()
    .route("/api/swaps", get(api::list_swaps))
    .route("/api/swap/{id}", get(api::swap_by_id))
    .route("/api/risk/{id}", get(api::risk_by_id))
    .route("/api/risk-batch", get(api::risk_batch))
    .route("/api/main-agg", get(api::main_agg))
    .route("/api/md/latest", get(api::latest_market_data))
    .route("/api/calibration/latest", get(api::latest_calibration))
    .route("/api/fixings", get(api::fixings))
    .route("/api/counterparty-cashflows", get(api::counterparty_cashflows))
    .route("/api/risk-series/{id}", get(api::risk_series))
    .route(auth::WS_PATH, get(sockets::ws_handler))
    .layer(middleware::from_fn_with_state(state.clone(), auth::require_signature))
    .route("/health", get(api::health))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(state)
}
