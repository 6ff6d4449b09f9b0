//! HTTP API for health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use usage_engine::health::{self, ComponentStatus, HealthMonitor};
use usage_engine::{MetricsSnapshot, SourceKind};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub monitor: HealthMonitor,
}

impl AppState {
    pub fn new(monitor: HealthMonitor) -> Self {
        Self { monitor }
    }
}

/// What the probes saw of the snapshot they judged
#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    pub source: Option<SourceKind>,
    pub scope: Option<&'static str>,
    pub online_cpus: u32,
    pub degraded: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub age_secs: Option<f64>,
}

impl SnapshotSummary {
    fn new(snapshot: &MetricsSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            source: snapshot.source,
            scope: snapshot.source.map(|s| s.scope()),
            online_cpus: snapshot.online_cpus,
            degraded: snapshot.degraded,
            last_updated: snapshot.last_updated,
            age_secs: snapshot.age(now).map(|age| age.as_secs_f64()),
        }
    }
}

/// Probe body: the verdict flattened, plus the snapshot it was taken from
#[derive(Debug, Serialize)]
struct ProbeBody<T: Serialize> {
    #[serde(flatten)]
    verdict: T,
    snapshot: SnapshotSummary,
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.snapshot();
    let now = Utc::now();
    let health = health::evaluate(&snapshot, now, state.monitor.refresh_interval());

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(ProbeBody {
            verdict: health,
            snapshot: SnapshotSummary::new(&snapshot, now),
        }),
    )
}

/// Readiness check response - returns 200 once a fresh snapshot exists, 503 otherwise
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.monitor.snapshot();
    let now = Utc::now();
    let readiness = health::readiness(&snapshot, now, state.monitor.refresh_interval());

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ProbeBody {
            verdict: readiness,
            snapshot: SnapshotSummary::new(&snapshot, now),
        }),
    )
}

/// Prometheus metrics endpoint
///
/// Gathering the default registry runs the snapshot collector, which reads
/// the sample store.
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
