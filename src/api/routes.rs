//! Resource handlers. Each returns the FetchResult envelope as JSON.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use crate::cache::FetchResult;
use crate::error::UpstreamError;

use super::server::AppState;

type ApiResult = Result<Json<FetchResult>, (StatusCode, Json<Value>)>;

/// Query flags accepted by every resource endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
  force_refresh: Option<String>,
}

impl RefreshQuery {
  fn forced(&self) -> bool {
    self
      .force_refresh
      .as_deref()
      .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
  }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
  Json(json!({
    "status": "ok",
    "cachedResources": state.legal.cached_resources(),
  }))
}

pub async fn lawsuits(
  State(state): State<Arc<AppState>>,
  Query(query): Query<RefreshQuery>,
) -> ApiResult {
  respond(state.legal.lawsuits(query.forced()).await)
}

pub async fn lawsuits_first_page(
  State(state): State<Arc<AppState>>,
  Query(query): Query<RefreshQuery>,
) -> ApiResult {
  respond(state.legal.lawsuits_first_page(query.forced()).await)
}

pub async fn movements(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Query(query): Query<RefreshQuery>,
) -> ApiResult {
  respond(state.legal.movements(&id, query.forced()).await)
}

pub async fn progress(
  State(state): State<Arc<AppState>>,
  Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
  match state.legal.progress(&key) {
    Some(progress) => (
      StatusCode::OK,
      Json(serde_json::to_value(progress).unwrap_or_else(|_| json!({}))),
    ),
    None => (
      StatusCode::NOT_FOUND,
      Json(json!({ "error": format!("no crawl recorded for {key}") })),
    ),
  }
}

fn respond(result: Result<FetchResult, UpstreamError>) -> ApiResult {
  result.map(Json).map_err(|err| {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    error!(status = status.as_u16(), error = %err, "request failed");
    (status, Json(json!({ "error": err.to_string() })))
  })
}
