//! Container-aware CPU and memory usage engine
//!
//! This crate provides:
//! - Counter sources for cgroup v2, cgroup v1 and `/proc/stat` with ordered fallback
//! - Utilization math that survives counter resets
//! - Per-process CPU time and resident memory from procfs
//! - A periodic refresher publishing into a lock-free sample store
//! - Observable-gauge callbacks and a Prometheus collector over that store
//! - Health checks and observability

pub mod calculator;
pub mod callback;
pub mod error;
pub mod exporter;
pub mod health;
pub mod models;
pub mod observability;
pub mod process;
pub mod refresher;
pub mod source;
pub mod store;

pub use calculator::{check_continuity, process_cpu_percent, utilization_percent, UsageCalculator};
pub use callback::{GaugeReading, MetricCallback};
pub use error::ReadError;
pub use exporter::SnapshotCollector;
pub use health::{ComponentHealth, ComponentStatus, HealthMonitor, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use process::{ProcessProbe, ProcfsProbe};
pub use refresher::{RefreshOutcome, Refresher, RefresherBuilder, RefresherConfig, RefresherState};
pub use source::{CounterSource, SourceConfig, TieredCounterSource};
pub use store::SampleStore;
