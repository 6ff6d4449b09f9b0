//! Prometheus adapter for `MetricCallback`
//!
//! `SnapshotCollector` implements `prometheus::core::Collector`, so every
//! registry gather (every scrape) calls `MetricCallback::observe` and turns
//! the readings into gauge families. Dotted attribute keys become
//! underscore label names.

use crate::callback::{GaugeDef, GaugeReading, MetricCallback, GAUGES};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::HashMap;
use tracing::warn;

/// Prometheus label name for an attribute key (`service.name` -> `service_name`)
pub fn sanitize_label(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn label_names(def: &GaugeDef) -> Vec<String> {
    def.label_keys.iter().map(|k| sanitize_label(k)).collect()
}

/// Collector that reads the sample store on every gather
pub struct SnapshotCollector {
    callback: MetricCallback,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    pub fn new(callback: MetricCallback) -> prometheus::Result<Self> {
        let descs = GAUGES
            .iter()
            .map(|def| {
                Desc::new(
                    def.name.to_string(),
                    def.help.to_string(),
                    label_names(def),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self { callback, descs })
    }

    fn family(def: &GaugeDef, readings: &[&GaugeReading]) -> prometheus::Result<Vec<MetricFamily>> {
        let names = label_names(def);
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let vec = GaugeVec::new(Opts::new(def.name, def.help), &name_refs)?;

        for reading in readings {
            let sanitized: Vec<(String, &str)> = reading
                .labels
                .iter()
                .map(|(k, v)| (sanitize_label(k), v.as_str()))
                .collect();
            let labels: HashMap<&str, &str> =
                sanitized.iter().map(|(k, v)| (k.as_str(), *v)).collect();
            vec.get_metric_with(&labels)?.set(reading.value);
        }

        Ok(vec.collect())
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let readings = self.callback.observe();
        let mut families = Vec::with_capacity(GAUGES.len());

        for def in GAUGES {
            let matching: Vec<&GaugeReading> =
                readings.iter().filter(|r| r.name == def.name).collect();
            if matching.is_empty() {
                continue;
            }

            match Self::family(def, &matching) {
                Ok(mut family) => families.append(&mut family),
                Err(e) => warn!(gauge = def.name, error = %e, "Failed to export gauge"),
            }
        }

        families
    }
}

/// Register the snapshot gauges with `registry`
pub fn register(callback: MetricCallback, registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(SnapshotCollector::new(callback)?))
}

/// Register the snapshot gauges with the process-wide default registry
pub fn register_default(callback: MetricCallback) -> prometheus::Result<()> {
    prometheus::register(Box::new(SnapshotCollector::new(callback)?))
}
