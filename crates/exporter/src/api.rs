//! HTTP API for metrics, probes and cache sync status

use crate::config::Settings;
use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use binpacking_lib::{
    duration::format_duration,
    health::{LivenessResponse, ReadinessResponse, SyncStatusResponse},
    leader::LeaderStatus,
    observability::ExporterMetrics,
    SyncInfo,
};
use chrono::Utc;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub sync_info: Arc<SyncInfo>,
    pub metrics: ExporterMetrics,
    /// Present when leader election is enabled
    pub leader: Option<Arc<LeaderStatus>>,
    pub settings: Arc<Settings>,
}

/// Landing page linking the endpoints and showing the active settings
async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let settings = &state.settings;
    let resources = settings
        .resources
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let leader = match &state.leader {
        Some(status) => format!(
            "enabled ({}, identity {})",
            status.state(),
            status.identity()
        ),
        None => "disabled".to_string(),
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Kube Cluster Binpacking Exporter</title></head>
<body>
<h1>Kube Cluster Binpacking Exporter</h1>
<p>Version {version}</p>
<ul>
<li><a href="{path}">{path}</a>: Prometheus metrics for node and cluster binpacking</li>
<li><a href="/sync">/sync</a>: cache synchronization status (JSON)</li>
<li><a href="/healthz">/healthz</a>: liveness probe</li>
<li><a href="/readyz">/readyz</a>: readiness probe, 503 until the caches are synced</li>
</ul>
<h2>Configuration</h2>
<ul>
<li>Resources: {resources}</li>
<li>Resync period: {resync}</li>
<li>Debug logging: {debug}</li>
<li>Leader election: {leader}</li>
</ul>
</body>
</html>
"#,
        version = env!("CARGO_PKG_VERSION"),
        path = settings.metrics_path,
        resources = resources,
        resync = format_duration(settings.resync_period),
        debug = settings.debug,
        leader = leader,
    ))
}

/// Liveness check; answering at all means alive
async fn healthz() -> Json<LivenessResponse> {
    Json(LivenessResponse::ok())
}

/// Readiness check - returns 200 once both caches are synced, 503 before
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = ReadinessResponse::from_sync_info(&state.sync_info);

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatusResponse> {
    Json(SyncStatusResponse::from_sync_info(
        &state.sync_info,
        Utc::now(),
    ))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    if let Some(leader) = &state.leader {
        state.metrics.set_leader(leader.is_leader());
    }

    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let metrics_path = state.settings.metrics_path.clone();

    Router::new()
        .route("/", get(index))
        .route(&metrics_path, get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/sync", get(sync_status))
        .with_state(state)
}

/// Serve the API until `shutdown` fires, then drain in-flight requests
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}
