//! Observable-gauge callback over the sample store
//!
//! `MetricCallback::observe` is invoked by the metrics pipeline whenever it
//! collects. It only clones the latest snapshot out of the store, so it never
//! touches the filesystem and never waits on the refresher.

use crate::models::MetricsSnapshot;
use crate::store::SampleStore;
use chrono::Utc;
use std::time::Duration;

pub const CONTAINER_CPU_USAGE: &str = "container_cpu_usage";
pub const PROCESS_CPU_USAGE: &str = "process_cpu_usage";
pub const PROCESS_MEMORY_USAGE: &str = "process_memory_usage";
pub const SNAPSHOT_DEGRADED: &str = "usage_snapshot_degraded";
pub const SNAPSHOT_AGE_SECONDS: &str = "usage_snapshot_age_seconds";

/// Name, help text and attribute keys of one exported gauge
#[derive(Debug, Clone, Copy)]
pub struct GaugeDef {
    pub name: &'static str,
    pub help: &'static str,
    pub label_keys: &'static [&'static str],
}

/// Every gauge `observe` can emit
pub const GAUGES: &[GaugeDef] = &[
    GaugeDef {
        name: CONTAINER_CPU_USAGE,
        help: "CPU utilization of the container (or host when scope=system), 0-100",
        label_keys: &["service.name", "metric.type", "scope"],
    },
    GaugeDef {
        name: PROCESS_CPU_USAGE,
        help: "CPU utilization of the monitored process as a share of one core, 0-100",
        label_keys: &["service.name", "process.pid", "process.name", "metric.type"],
    },
    GaugeDef {
        name: PROCESS_MEMORY_USAGE,
        help: "Resident memory of the monitored process in bytes",
        label_keys: &["service.name", "process.pid", "process.name", "metric.type"],
    },
    GaugeDef {
        name: SNAPSHOT_DEGRADED,
        help: "1 when the published figures come from a fallback, a discarded interval or are stale",
        label_keys: &["service.name"],
    },
    GaugeDef {
        name: SNAPSHOT_AGE_SECONDS,
        help: "Seconds since the snapshot was last refreshed",
        label_keys: &["service.name"],
    },
];

/// One gauge value with its attributes
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeReading {
    pub name: &'static str,
    pub value: f64,
    pub labels: Vec<(&'static str, String)>,
}

impl GaugeReading {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Translates the current snapshot into gauge readings
#[derive(Debug, Clone)]
pub struct MetricCallback {
    store: SampleStore,
    service_name: String,
    refresh_interval: Duration,
}

impl MetricCallback {
    pub fn new(store: SampleStore, service_name: impl Into<String>, refresh_interval: Duration) -> Self {
        Self {
            store,
            service_name: service_name.into(),
            refresh_interval,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Read the store and return the current gauge values.
    ///
    /// Usage gauges are omitted until the first refresh has completed, and
    /// the container gauge until a counter tier has been read. The degraded
    /// gauge is always present.
    pub fn observe(&self) -> Vec<GaugeReading> {
        let snapshot = self.store.read();
        self.readings(&snapshot)
    }

    fn readings(&self, snapshot: &MetricsSnapshot) -> Vec<GaugeReading> {
        let now = Utc::now();
        let stale = snapshot.is_stale(now, self.refresh_interval);
        let service = || ("service.name", self.service_name.clone());

        let mut readings = vec![GaugeReading {
            name: SNAPSHOT_DEGRADED,
            value: if snapshot.degraded || stale { 1.0 } else { 0.0 },
            labels: vec![service()],
        }];

        let Some(age) = snapshot.age(now) else {
            return readings;
        };

        readings.push(GaugeReading {
            name: SNAPSHOT_AGE_SECONDS,
            value: age.as_secs_f64(),
            labels: vec![service()],
        });

        // No counter tier has ever been read
        if snapshot.source.is_some() {
            readings.push(GaugeReading {
                name: CONTAINER_CPU_USAGE,
                value: snapshot.system_or_container_cpu_pct,
                labels: vec![
                    service(),
                    ("metric.type", "container_cpu".to_string()),
                    ("scope", snapshot.scope().to_string()),
                ],
            });
        }

        let process_labels = |metric_type: &str| {
            vec![
                service(),
                ("process.pid", snapshot.pid.to_string()),
                ("process.name", snapshot.process_name.clone()),
                ("metric.type", metric_type.to_string()),
            ]
        };

        readings.push(GaugeReading {
            name: PROCESS_CPU_USAGE,
            value: snapshot.process_cpu_pct,
            labels: process_labels("process_cpu"),
        });
        readings.push(GaugeReading {
            name: PROCESS_MEMORY_USAGE,
            value: snapshot.process_memory_bytes as f64,
            labels: process_labels("process_memory"),
        });

        readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn fresh_snapshot(source: SourceKind) -> MetricsSnapshot {
        MetricsSnapshot {
            system_or_container_cpu_pct: 42.5,
            process_cpu_pct: 12.0,
            process_memory_bytes: 64 * 1024 * 1024,
            pid: 4242,
            process_name: "checkout".to_string(),
            online_cpus: 2,
            last_updated: Some(Utc::now()),
            degraded: !source.is_container_scoped(),
            source: Some(source),
        }
    }

    fn find<'a>(readings: &'a [GaugeReading], name: &str) -> &'a GaugeReading {
        readings.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn test_observe_before_first_refresh() {
        let store = SampleStore::new(MetricsSnapshot::initial(1, 1));
        let callback = MetricCallback::new(store, "checkout", Duration::from_secs(5));

        let readings = callback.observe();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].name, SNAPSHOT_DEGRADED);
        assert_eq!(readings[0].value, 1.0);
    }

    #[test]
    fn test_observe_container_snapshot() {
        let store = SampleStore::new(fresh_snapshot(SourceKind::CgroupV2));
        let callback = MetricCallback::new(store, "checkout", Duration::from_secs(5));

        let readings = callback.observe();
        assert_eq!(readings.len(), 5);

        let cpu = find(&readings, CONTAINER_CPU_USAGE);
        assert_eq!(cpu.value, 42.5);
        assert_eq!(cpu.label("service.name"), Some("checkout"));
        assert_eq!(cpu.label("metric.type"), Some("container_cpu"));
        assert_eq!(cpu.label("scope"), Some("container"));

        let memory = find(&readings, PROCESS_MEMORY_USAGE);
        assert_eq!(memory.value, 67_108_864.0);
        assert_eq!(memory.label("process.pid"), Some("4242"));
        assert_eq!(memory.label("process.name"), Some("checkout"));
        assert_eq!(memory.label("metric.type"), Some("process_memory"));

        let process_cpu = find(&readings, PROCESS_CPU_USAGE);
        assert_eq!(process_cpu.label("metric.type"), Some("process_cpu"));

        assert_eq!(find(&readings, SNAPSHOT_DEGRADED).value, 0.0);
    }

    #[test]
    fn test_observe_fallback_is_system_scope() {
        let store = SampleStore::new(fresh_snapshot(SourceKind::ProcStat));
        let callback = MetricCallback::new(store, "checkout", Duration::from_secs(5));

        let readings = callback.observe();
        assert_eq!(find(&readings, CONTAINER_CPU_USAGE).label("scope"), Some("system"));
        assert_eq!(find(&readings, SNAPSHOT_DEGRADED).value, 1.0);
    }

    #[test]
    fn test_observe_marks_stale_snapshot_degraded() {
        let mut snapshot = fresh_snapshot(SourceKind::CgroupV1);
        snapshot.last_updated = Some(Utc::now() - chrono::Duration::seconds(30));
        let store = SampleStore::new(snapshot);
        let callback = MetricCallback::new(store, "checkout", Duration::from_secs(5));

        let readings = callback.observe();
        assert_eq!(find(&readings, SNAPSHOT_DEGRADED).value, 1.0);
        assert!(find(&readings, SNAPSHOT_AGE_SECONDS).value >= 30.0);
    }

    #[test]
    fn test_observe_without_counter_source_omits_container_cpu() {
        let mut snapshot = fresh_snapshot(SourceKind::CgroupV2);
        snapshot.source = None;
        snapshot.degraded = true;
        let store = SampleStore::new(snapshot);
        let callback = MetricCallback::new(store, "checkout", Duration::from_secs(5));

        let readings = callback.observe();
        assert!(readings.iter().all(|r| r.name != CONTAINER_CPU_USAGE));
        assert_eq!(find(&readings, PROCESS_MEMORY_USAGE).value, 67_108_864.0);
        assert_eq!(find(&readings, SNAPSHOT_DEGRADED).value, 1.0);
    }

    #[test]
    fn test_observe_follows_store_updates() {
        let store = SampleStore::new(MetricsSnapshot::initial(1, 1));
        let callback = MetricCallback::new(store.clone(), "checkout", Duration::from_secs(5));
        assert_eq!(callback.observe().len(), 1);

        store.publish(fresh_snapshot(SourceKind::CgroupV2));
        assert_eq!(callback.observe().len(), 5);
    }

    #[test]
    fn test_readings_match_gauge_defs() {
        let store = SampleStore::new(fresh_snapshot(SourceKind::CgroupV2));
        let callback = MetricCallback::new(store, "checkout", Duration::from_secs(5));

        for reading in callback.observe() {
            let def = GAUGES.iter().find(|d| d.name == reading.name).unwrap();
            let keys: Vec<&str> = reading.labels.iter().map(|(k, _)| *k).collect();
            assert_eq!(keys, def.label_keys);
        }
    }
}
