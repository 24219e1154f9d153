use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{
  config::AppConfig,
  store::{BlotterStore, MemoryStore, PgStore, StoreError},
};

// Request context attached by the auth middleware
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
  pub remote_ip: String,
  pub origin: String,
  pub user_agent: String,
  pub timestamp: String,
  pub signature: String,
}

#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Unauthorized(String),
  #[error("{0}")]
  InternalError(String),
}

impl From<StoreError> for AppError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::InvalidSortField(_) | StoreError::InvalidSortOrder(_) => Self::BadRequest(e.to_string()),
      other => {
        error!(error = %other, "store failure");
        Self::InternalError(other.to_string())
      }
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> axum::response::Response {
    let status = match &self {
      Self::BadRequest(_) => StatusCode::BAD_REQUEST,
      Self::NotFound(_) => StatusCode::NOT_FOUND,
      Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = Json(json!({"error": self.to_string(), "code": status.as_u16()}));

    (status, body).into_response()
  }
}

/// Shared by every route and websocket session.
#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn BlotterStore>,
  pub config: Arc<AppConfig>,
}

impl AppState {
  pub fn new(store: Arc<dyn BlotterStore>, config: AppConfig) -> Self {
    Self { store, config: Arc::new(config) }
  }

  /// Picks Postgres when a database url is configured, else an empty memory store.
  pub async fn from_config(config: AppConfig) -> Result<Self, AppError> {
    let store: Arc<dyn BlotterStore> = match config.database_url.as_deref() {
      Some(url) => Arc::new(
        PgStore::connect(url, config.db_max_connections)
          .await
          .map_err(|e| AppError::InternalError(format!("Postgres connection error: {}", e)))?,
      ),
      None => Arc::new(MemoryStore::new()),
    };
    Ok(Self::new(store, config))
  }
}
