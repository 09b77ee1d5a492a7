use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::cache::OrderCache;
use crate::db::OrderStore;

/// Shared lookup state, constructed once at startup and injected into every
/// handler.
pub struct AppState {
  pub store: Arc<dyn OrderStore>,
  pub cache: Arc<OrderCache>,
  /// Upper bound for a single store round-trip on a cache miss, independent
  /// of the process-wide shutdown signal.
  pub lookup_timeout: Duration,
}

pub fn build_router(state: Arc<AppState>) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods(Any)
    .allow_headers(Any);

  Router::new()
    .route("/order/{order_uid}", get(get_order))
    .with_state(state)
    .layer(cors)
}

/// Cache-first point lookup with read-through population on miss.
///
/// Clients only ever see 200, 400 or 404; store errors and timeouts are
/// logged and reported as 404.
async fn get_order(
  State(state): State<Arc<AppState>>,
  Path(order_uid): Path<String>,
) -> Response {
  if order_uid.trim().is_empty() {
    return (StatusCode::BAD_REQUEST, "order_uid must not be empty").into_response();
  }

  if let Some(order) = state.cache.get(&order_uid) {
    tracing::debug!(%order_uid, "order served from cache");
    return Json(order).into_response();
  }

  tracing::debug!(%order_uid, "cache miss, querying store");
  match tokio::time::timeout(state.lookup_timeout, state.store.get_order(&order_uid)).await {
    Ok(Ok(Some(order))) => {
      state.cache.set(order.order_uid.clone(), order.clone());
      Json(order).into_response()
    }
    Ok(Ok(None)) => (StatusCode::NOT_FOUND, "order not found").into_response(),
    Ok(Err(e)) => {
      tracing::error!(%order_uid, error = %e, "order lookup failed");
      (StatusCode::NOT_FOUND, "order not found").into_response()
    }
    Err(_) => {
      tracing::error!(%order_uid, "order lookup timed out");
      (StatusCode::NOT_FOUND, "order not found").into_response()
    }
  }
}
