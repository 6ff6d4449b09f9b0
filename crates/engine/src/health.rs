//! Health and readiness derived from the latest snapshot
//!
//! Backs the agent's liveness and readiness probes. Nothing is tracked
//! separately: every answer is computed from what the refresher last
//! published.

use crate::models::{MetricsSnapshot, SourceKind};
use crate::store::SampleStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: now.timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names reported in `HealthResponse`
pub mod components {
    pub const REFRESHER: &str = "refresher";
    pub const COUNTER_SOURCE: &str = "counter_source";
    pub const SNAPSHOT: &str = "snapshot";
}

/// Evaluate the health of a snapshot as of `now`
pub fn evaluate(snapshot: &MetricsSnapshot, now: DateTime<Utc>, refresh_interval: Duration) -> HealthResponse {
    let mut map = HashMap::new();

    let refresher = match snapshot.age(now) {
        None => ComponentHealth::new(
            ComponentStatus::Unhealthy,
            Some("No refresh has completed yet".to_string()),
            now,
        ),
        Some(age) if snapshot.is_stale(now, refresh_interval) => ComponentHealth::new(
            ComponentStatus::Unhealthy,
            Some(format!("Last refresh {}s ago", age.as_secs())),
            now,
        ),
        Some(_) => ComponentHealth::new(ComponentStatus::Healthy, None, now),
    };
    map.insert(components::REFRESHER.to_string(), refresher);

    let source = match snapshot.source {
        None => ComponentHealth::new(
            ComponentStatus::Unhealthy,
            Some("No counter source has been read".to_string()),
            now,
        ),
        Some(SourceKind::ProcStat) => ComponentHealth::new(
            ComponentStatus::Degraded,
            Some("Using /proc/stat, figures are host-wide".to_string()),
            now,
        ),
        Some(kind) => ComponentHealth::new(
            ComponentStatus::Healthy,
            Some(format!("Using {}", kind)),
            now,
        ),
    };
    map.insert(components::COUNTER_SOURCE.to_string(), source);

    let snapshot_health = if snapshot.degraded {
        ComponentHealth::new(
            ComponentStatus::Degraded,
            Some("Latest snapshot is degraded".to_string()),
            now,
        )
    } else {
        ComponentHealth::new(ComponentStatus::Healthy, None, now)
    };
    map.insert(components::SNAPSHOT.to_string(), snapshot_health);

    let status = HealthResponse::compute_status(&map);
    HealthResponse {
        status,
        components: map,
    }
}

/// Answers health and readiness queries from the sample store
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    store: SampleStore,
    refresh_interval: Duration,
}

impl HealthMonitor {
    pub fn new(store: SampleStore, refresh_interval: Duration) -> Self {
        Self {
            store,
            refresh_interval,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.store.read()
    }

    pub fn health(&self) -> HealthResponse {
        evaluate(&self.store.read(), Utc::now(), self.refresh_interval)
    }

    pub fn readiness(&self) -> ReadinessResponse {
        readiness(&self.store.read(), Utc::now(), self.refresh_interval)
    }
}

/// Ready once a refresh has completed and the snapshot is not stale
pub fn readiness(snapshot: &MetricsSnapshot, now: DateTime<Utc>, refresh_interval: Duration) -> ReadinessResponse {
    if snapshot.last_updated.is_none() {
        return ReadinessResponse {
            ready: false,
            reason: Some("No refresh has completed yet".to_string()),
        };
    }

    if snapshot.is_stale(now, refresh_interval) {
        return ReadinessResponse {
            ready: false,
            reason: Some("Snapshot is stale".to_string()),
        };
    }

    ReadinessResponse {
        ready: true,
        reason: None,
    }
}
