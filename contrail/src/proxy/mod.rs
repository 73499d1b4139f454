//! Transparent capture proxy.
//!
//! Mirrors any HTTP request to the configured upstream, passes the response
//! through unchanged (streaming SSE line by line), and appends one
//! `TraceRecord` per upstream call to the capture store. `/health` is the
//! only route the proxy answers itself.

mod forward;

pub use forward::forward_request;

use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Json, Router};
use ractor::ActorRef;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::capture::CaptureStoreMsg;
use crate::config::ProxyConfig;

/// Shared proxy state: upstream base URL, the reusable HTTP client, and the
/// capture store handle.
pub struct AppState {
    pub target: String,
    pub client: reqwest::Client,
    pub capture: ActorRef<CaptureStoreMsg>,
}

impl AppState {
    pub fn new(
        target: &str,
        capture: ActorRef<CaptureStoreMsg>,
        config: &ProxyConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;
        Ok(Self {
            target: target.trim_end_matches('/').to_string(),
            client,
            capture,
        })
    }
}

/// Build the proxy router. Everything except `/health` falls through to the
/// forwarder.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(forward::forward_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
