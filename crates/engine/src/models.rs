//! Core data models for the usage engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Kernel interface a counter sample was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CgroupV2,
    CgroupV1,
    ProcStat,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::CgroupV2 => "cgroup_v2",
            SourceKind::CgroupV1 => "cgroup_v1",
            SourceKind::ProcStat => "proc_stat",
        }
    }

    /// Whether the counters are scoped to this container's cgroup
    pub fn is_container_scoped(&self) -> bool {
        !matches!(self, SourceKind::ProcStat)
    }

    /// Value of the `scope` label for figures derived from this source
    pub fn scope(&self) -> &'static str {
        if self.is_container_scoped() {
            "container"
        } else {
            "system"
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reading of the container (or host) CPU counters.
///
/// For cgroup sources `active_ticks_or_ns` is cumulative CPU time in
/// nanoseconds and `total_ticks_or_ns` is a monotonic wall-clock reading in
/// nanoseconds. For `/proc/stat` both are cumulative clock ticks summed over
/// every CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCounterSample {
    pub active_ticks_or_ns: u64,
    pub total_ticks_or_ns: u64,
    pub quota_ns: Option<i64>,
    pub period_ns: Option<u64>,
    pub online_cpus: u32,
    pub captured_at: Instant,
    pub source_kind: SourceKind,
}

/// CPU time and resident memory of a single process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_time_ns: u64,
    pub resident_memory_bytes: u64,
    pub captured_at: Instant,
}

/// Utilization derived from a pair of counter samples, normalized to `[0, 100]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageResult {
    pub percent: f64,
    pub basis: SourceKind,
    pub computed_at: Instant,
    pub degraded: bool,
}

/// The figures published to exporters, replaced wholesale on every refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system_or_container_cpu_pct: f64,
    pub process_cpu_pct: f64,
    pub process_memory_bytes: u64,
    pub pid: u32,
    /// Command name of `pid`, empty until it has been read once
    pub process_name: String,
    pub online_cpus: u32,
    /// `None` until the first successful refresh
    pub last_updated: Option<DateTime<Utc>>,
    pub degraded: bool,
    /// Tier that produced `system_or_container_cpu_pct`
    pub source: Option<SourceKind>,
}

impl MetricsSnapshot {
    /// Placeholder held by the store before the first refresh
    pub fn initial(pid: u32, online_cpus: u32) -> Self {
        Self {
            system_or_container_cpu_pct: 0.0,
            process_cpu_pct: 0.0,
            process_memory_bytes: 0,
            pid,
            process_name: String::new(),
            online_cpus,
            last_updated: None,
            degraded: true,
            source: None,
        }
    }

    /// Scope label for the container CPU figure
    pub fn scope(&self) -> &'static str {
        self.source.map(|s| s.scope()).unwrap_or("container")
    }

    /// Age of the snapshot, `None` if it was never refreshed
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_updated
            .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO))
    }

    /// True when the snapshot has not advanced for more than two refresh intervals
    pub fn is_stale(&self, now: DateTime<Utc>, refresh_interval: Duration) -> bool {
        match self.age(now) {
            Some(age) => age > refresh_interval * 2,
            None => true,
        }
    }
}
