//! Axum server for the resource endpoints.

use axum::routing::get;
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use crate::legal::CachedLegalClient;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
  /// Cached case-management client every resource endpoint delegates to.
  pub legal: CachedLegalClient,
}

impl AppState {
  pub fn new(legal: CachedLegalClient) -> Self {
    Self { legal }
  }
}

/// Build the router with all resource routes.
pub fn build_router(state: AppState) -> Router {
  Router::new()
    .route("/api/health", get(super::routes::health))
    .route("/api/lawsuits", get(super::routes::lawsuits))
    .route(
      "/api/lawsuits/first-page",
      get(super::routes::lawsuits_first_page),
    )
    .route(
      "/api/lawsuits/{id}/movements",
      get(super::routes::movements),
    )
    .route("/api/progress/{key}", get(super::routes::progress))
    .with_state(Arc::new(state))
}

/// Bind `addr` and serve until the process is stopped.
pub async fn start_server(addr: &str, state: AppState) -> Result<()> {
  let app = build_router(state);
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
  tracing::info!("casemirror listening on {addr}");
  axum::serve(listener, app)
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;
  Ok(())
}
