use std::{
  net::SocketAddr,
  time::{SystemTime, UNIX_EPOCH},
};

use axum::{
  extract::{ConnectInfo, Request, State},
  http::HeaderMap,
  middleware::Next,
  response::IntoResponse,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use super::app_state::{AppError, AppState, RequestContext};
use crate::config::AuthConfig;

pub const WS_PATH: &str = "/ws";
const MAX_AGE_SECS: u64 = 60;

type HmacSha256 = Hmac<Sha256>;

/// hex(HMAC-SHA256(key, path ++ ts))
pub fn sign(key: &str, path: &str, timestamp: u64) -> Result<String, AppError> {
  let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| AppError::InternalError(e.to_string()))?;
  mac.update(format!("{}{}", path, timestamp).as_bytes());
  Ok(hex::encode(mac.finalize().into_bytes()))
}

fn credentials(headers: &HeaderMap, path: &str) -> (Option<u64>, Option<String>) {
  if path == WS_PATH {
    // browsers can only send the pair as websocket subprotocols
    headers
      .get("sec-websocket-protocol")
      .and_then(|v| v.to_str().ok())
      .map(|proto| {
        let mut parts = proto.split(',').map(|s| s.trim());
        let ts = parts.next().and_then(|s| s.parse::<u64>().ok());
        let sig = parts.next().map(str::to_string);
        (ts, sig)
      })
      .unwrap_or((None, None))
  } else {
    let ts = headers.get("x-timestamp").and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<u64>().ok());
    let sig = headers.get("x-signature").and_then(|v| v.to_str().ok()).map(str::to_string);
    (ts, sig)
  }
}

/// Checks origin, freshness and signature of a request.
pub fn verify(auth: &AuthConfig, headers: &HeaderMap, path: &str, now: u64) -> Result<(String, u64, String), AppError> {
  let origin = headers.get("origin").and_then(|v| v.to_str().ok()).unwrap_or("NA");
  if !origin.contains(&auth.expected_origin) {
    return Err(AppError::Unauthorized("Invalid origin".to_string()));
  }

  let (Some(ts), Some(sig)) = credentials(headers, path) else {
    return Err(AppError::Unauthorized("Missing timestamp or signature".to_string()));
  };
  if now.saturating_sub(ts) > MAX_AGE_SECS {
    return Err(AppError::Unauthorized("Request expired".to_string()));
  }
  if sig != sign(&auth.hmac_key, path, ts)? {
    return Err(AppError::Unauthorized("Invalid signature".to_string()));
  }
  Ok((origin.to_string(), ts, sig))
}

fn client_identity(req: &Request) -> (String, String) {
  let headers = req.headers();
  let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip().to_string());
  let remote_ip = headers
    .get("x-forwarded-for")
    .and_then(|h| h.to_str().ok())
    .map(str::to_string)
    .or(peer)
    .unwrap_or_else(|| "NA".to_string());
  let user_agent = headers.get("user-agent").and_then(|h| h.to_str().ok()).unwrap_or("NA").to_string();
  (remote_ip, user_agent)
}

/// Attaches a [`RequestContext`]; when a key is configured the request must also be signed.
pub async fn require_signature(
  State(state): State<AppState>,
  mut req: Request,
  next: Next,
) -> Result<impl IntoResponse, AppError> {
  let (remote_ip, user_agent) = client_identity(&req);

  let Some(auth) = state.config.auth.as_ref() else {
    req.extensions_mut().insert(RequestContext { remote_ip, user_agent, ..RequestContext::default() });
    return Ok(next.run(req).await);
  };

  let now = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map_err(|e| AppError::InternalError(e.to_string()))?
    .as_secs();
  let path = req.uri().path().to_string();
  debug!(%path, %remote_ip, "verifying request signature");

  let (origin, timestamp, signature) = verify(auth, req.headers(), &path, now).inspect_err(|e| {
    warn!(%path, %remote_ip, error = %e, "rejected request");
  })?;

  req.extensions_mut().insert(RequestContext {
    remote_ip,
    origin,
    user_agent,
    timestamp: timestamp.to_string(),
    signature,
  });

  Ok(next.run(req).await)
}
