//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with service endpoints and the proxy fallback
//! - Wire up the middleware chain in outermost-first order
//! - Serve with graceful shutdown

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use crate::http::capture;
use crate::http::middleware::{access_log, cors, default_content_type, handle_panic};
use crate::proxy::{proxy_handler, AppState};

/// Build the router with all middleware layers.
///
/// The chain reads outermost-first: Recovery, Logger, CORS, Content-Type,
/// Capture, then the route table with the proxy handler as fallback.
pub fn build_router(state: AppState) -> Router {
    let request_timeout = std::time::Duration::from_secs(state.config.server.write_timeout.max(1));
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TimeoutLayer::new(request_timeout))
                .layer(middleware::from_fn(access_log))
                .layer(middleware::from_fn(cors))
                .layer(middleware::from_fn(default_content_type))
                .layer(middleware::from_fn_with_state(state.clone(), capture::capture)),
        )
        .with_state(state)
}

/// Serve until the shutdown signal fires, then drain connections.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "healthy" })).into_response()
}

async fn status_handler(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "running",
        "providers": state.providers.provider_count(),
        "registered_endpoints": state.providers.endpoint_count(),
    }))
    .into_response()
}

/// JSON snapshot of both sink counters; 503 when logging is disabled.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(log_sink) = state.log_sink.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Logging not enabled").into_response();
    };

    let mut body = serde_json::json!({
        "request_logs": log_sink.stats(),
    });
    if let Some(metrics_sink) = state.metrics_sink.as_ref() {
        body["guardrail_metrics"] = serde_json::to_value(metrics_sink.stats())
            .unwrap_or(serde_json::Value::Null);
    }
    Json(body).into_response()
}
