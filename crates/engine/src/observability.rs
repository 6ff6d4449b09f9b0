//! Observability for the engine itself
//!
//! Provides:
//! - Prometheus metrics about the refresh loop (latency, errors, resets, active tier)
//! - Structured JSON-friendly logging of lifecycle events with tracing

use crate::models::{MetricsSnapshot, SourceKind};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Histogram buckets for refresh latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    refresh_latency_seconds: Histogram,
    refresh_errors: IntCounterVec,
    counter_resets: IntCounter,
    source_tier: IntGaugeVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            refresh_latency_seconds: register_histogram!(
                "usage_engine_refresh_latency_seconds",
                "Time spent reading kernel counters and publishing a snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register refresh_latency_seconds"),

            refresh_errors: register_int_counter_vec!(
                "usage_engine_refresh_errors_total",
                "Failed reads during refresh, by component",
                &["component"]
            )
            .expect("Failed to register refresh_errors_total"),

            counter_resets: register_int_counter!(
                "usage_engine_counter_resets_total",
                "Intervals discarded because a cumulative counter went backwards"
            )
            .expect("Failed to register counter_resets_total"),

            source_tier: register_int_gauge_vec!(
                "usage_engine_source_tier",
                "Counter source currently in use (1 for the active kind)",
                &["kind"]
            )
            .expect("Failed to register source_tier"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_refresh_latency(&self, elapsed: Duration) {
        self.inner()
            .refresh_latency_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_refresh_errors(&self, component: &str) {
        self.inner()
            .refresh_errors
            .with_label_values(&[component])
            .inc();
    }

    pub fn inc_counter_resets(&self) {
        self.inner().counter_resets.inc();
    }

    /// Mark `kind` as the active tier, or none when every tier failed
    pub fn set_source_tier(&self, kind: Option<SourceKind>) {
        let gauge = &self.inner().source_tier;
        for candidate in [SourceKind::CgroupV2, SourceKind::CgroupV1, SourceKind::ProcStat] {
            let value = i64::from(Some(candidate) == kind);
            gauge.with_label_values(&[candidate.as_str()]).set(value);
        }
    }
}

/// Structured logger for engine lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, pid: u32, interval: Duration) {
        info!(
            event = "usage_engine_started",
            service = %self.service_name,
            version = %version,
            pid = pid,
            interval_secs = interval.as_secs_f64(),
            "Usage engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "usage_engine_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Usage engine shutting down"
        );
    }

    pub fn log_counter_reset(&self, kind: SourceKind) {
        warn!(
            event = "counter_reset",
            service = %self.service_name,
            source = %kind,
            "Counter went backwards, keeping previous percentage"
        );
    }

    pub fn log_read_failure(&self, component: &str, error: &dyn std::error::Error) {
        warn!(
            event = "refresh_read_failed",
            service = %self.service_name,
            component = %component,
            error = %error,
            "Refresh read failed"
        );
    }

    pub fn log_snapshot(&self, snapshot: &MetricsSnapshot) {
        debug!(
            event = "snapshot_published",
            service = %self.service_name,
            container_cpu_pct = snapshot.system_or_container_cpu_pct,
            process_cpu_pct = snapshot.process_cpu_pct,
            process_memory_bytes = snapshot.process_memory_bytes,
            scope = snapshot.scope(),
            degraded = snapshot.degraded,
            "Published metrics snapshot"
        );
    }
}
