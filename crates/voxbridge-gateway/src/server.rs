//! Axum HTTP + WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::calls::{continue_call, start_call};
use crate::numbers::list_numbers;
use crate::state::GatewayState;
use crate::stream::stream_handler;

/// Build the gateway router.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let router = Router::new()
        .route("/stream", get(stream_handler))
        .route("/twiml/start", post(start_call))
        .route("/twiml/continue/{call_id}", post(continue_call))
        .route("/numbers", get(list_numbers))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics_handler));

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the gateway on the configured bind address and `port`.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    #[cfg(feature = "metrics")]
    if crate::metrics::prometheus_handle().is_some() {
        info!("Prometheus metrics exposed at /metrics");
    }

    let addr = format!("{}:{port}", state.config.bind_addr());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let active_sessions = state.sessions.len().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "active_sessions": active_sessions,
        "media_streams": state.active_media_sessions(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    use axum::http::StatusCode;

    match crate::metrics::prometheus_handle() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder unavailable".to_string(),
        ),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
