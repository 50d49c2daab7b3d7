//! Read-only HTTP status surface (`--api-port`).

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::{controller::Controller, types::StatusSnapshot};

pub fn router(controller: Arc<Controller>) -> axum::Router {
    use axum::{routing, Router};

    Router::new()
        .route("/health", routing::get(api_health))
        .route("/status", routing::get(api_status))
        .with_state(controller)
}

async fn api_health() -> axum::Json<Value> {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    axum::Json(json!({
        "status": "ok",
        "service": "agent-relay-bridge",
        "host": host,
    }))
}

async fn api_status(
    axum::extract::State(controller): axum::extract::State<Arc<Controller>>,
) -> axum::Json<StatusSnapshot> {
    axum::Json(controller.status())
}

/// Bind on loopback and serve in the background.
pub async fn serve(controller: Arc<Controller>, api_port: u16) -> Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{api_port}"))
        .await
        .with_context(|| format!("failed to bind API on port {api_port}"))?;
    tracing::info!(
        target = "relay_bridge::api",
        port = api_port,
        "status API listening on http://127.0.0.1:{api_port}"
    );

    let app = router(controller);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(target = "relay_bridge::api", error = %e, "HTTP API server error");
        }
    }))
}
