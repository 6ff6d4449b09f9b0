//! Counter sources for container CPU accounting
//!
//! This module reads cumulative CPU counters from one of three kernel
//! interfaces, tried in order on every read:
//! 1. cgroup v2 (`cpu.stat` + `cpu.max`)
//! 2. cgroup v1 (`cpuacct.usage` + CFS quota/period)
//! 3. `/proc/stat` (system-wide, only when fallback is enabled)

mod cgroup_v1;
mod cgroup_v2;
mod proc_stat;


pub use cgroup_v1::CgroupV1Source;
pub use cgroup_v2::CgroupV2Source;
pub use proc_stat::{CpuTicks, ProcStatSource};

use crate::error::ReadError;
use crate::models::{RawCounterSample, SourceKind};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;
use tracing::{info, warn};

/// Trait for reading a single counter sample
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Read the current cumulative counters
    async fn read(&self) -> Result<RawCounterSample, ReadError>;
}

/// Where to look for kernel files and which tiers are allowed
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// cgroup mount root (default: /sys/fs/cgroup)
    pub cgroup_root: PathBuf,
    /// procfs mount root (default: /proc)
    pub proc_root: PathBuf,
    /// Fall back to system-wide /proc/stat when no cgroup tier is readable
    pub enable_proc_stat_fallback: bool,
    /// Override for the host logical CPU count (detected when `None`)
    pub host_cpus: Option<u32>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from("/sys/fs/cgroup"),
            proc_root: PathBuf::from("/proc"),
            enable_proc_stat_fallback: true,
            host_cpus: None,
        }
    }
}

/// Which tier the last read settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Unset,
    Active(SourceKind),
    Exhausted,
}

/// Ordered fallback chain over the available counter sources
pub struct TieredCounterSource {
    tiers: Vec<(SourceKind, Box<dyn CounterSource>)>,
    selection: Mutex<Selection>,
    transitions: AtomicU64,
}

impl TieredCounterSource {
    pub fn new(config: &SourceConfig) -> Self {
        let host_cpus = config.host_cpus.unwrap_or_else(host_cpu_count);

        let mut tiers: Vec<(SourceKind, Box<dyn CounterSource>)> = vec![
            (
                SourceKind::CgroupV2,
                Box::new(CgroupV2Source::new(&config.cgroup_root, host_cpus)),
            ),
            (
                SourceKind::CgroupV1,
                Box::new(CgroupV1Source::new(&config.cgroup_root, host_cpus)),
            ),
        ];

        if config.enable_proc_stat_fallback {
            tiers.push((
                SourceKind::ProcStat,
                Box::new(ProcStatSource::new(&config.proc_root, host_cpus)),
            ));
        }

        Self {
            tiers,
            selection: Mutex::new(Selection::Unset),
            transitions: AtomicU64::new(0),
        }
    }

    /// Kind selected by the most recent successful read
    pub fn active_kind(&self) -> Option<SourceKind> {
        match *self.selection.lock().unwrap_or_else(|e| e.into_inner()) {
            Selection::Active(kind) => Some(kind),
            _ => None,
        }
    }

    /// Number of tier changes logged so far
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Record the outcome of a read, logging only when the tier changes
    fn record(&self, next: Selection, attempts: &[String]) {
        let mut selection = self.selection.lock().unwrap_or_else(|e| e.into_inner());
        if *selection == next {
            return;
        }

        match next {
            Selection::Active(SourceKind::ProcStat) => warn!(
                source = %SourceKind::ProcStat,
                skipped = ?attempts,
                "No cgroup CPU accounting available, reporting system-wide usage"
            ),
            Selection::Active(kind) if attempts.is_empty() => {
                info!(source = %kind, "Selected counter source")
            }
            Selection::Active(kind) => warn!(
                source = %kind,
                skipped = ?attempts,
                "Selected fallback counter source"
            ),
            Selection::Exhausted => warn!(
                attempts = ?attempts,
                "All counter sources failed"
            ),
            Selection::Unset => {}
        }

        *selection = next;
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl CounterSource for TieredCounterSource {
    async fn read(&self) -> Result<RawCounterSample, ReadError> {
        let mut attempts = Vec::new();

        for (kind, tier) in &self.tiers {
            match tier.read().await {
                Ok(sample) => {
                    self.record(Selection::Active(*kind), &attempts);
                    return Ok(sample);
                }
                Err(e) if e.is_fallthrough() => attempts.push(format!("{}: {}", kind, e)),
                Err(e) => return Err(e),
            }
        }

        self.record(Selection::Exhausted, &attempts);
        Err(ReadError::AllSourcesExhausted { attempts })
    }
}

/// CPUs available to a cgroup with the given CFS allotment.
///
/// `max(1, floor(quota / period))` when both are positive, otherwise the host count.
pub fn online_cpus(quota: Option<i64>, period: Option<u64>, host_cpus: u32) -> u32 {
    match (quota, period) {
        (Some(quota), Some(period)) if quota > 0 && period > 0 => {
            let cpus = quota as u64 / period;
            u32::try_from(cpus).unwrap_or(u32::MAX).max(1)
        }
        _ => host_cpus.max(1),
    }
}

/// Logical CPUs online on the host, ignoring any cgroup quota
pub fn host_cpu_count() -> u32 {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if online > 0 {
        online as u32
    } else {
        num_cpus::get() as u32
    }
}

/// Capture instant plus nanoseconds elapsed on a process-wide monotonic clock
pub(crate) fn monotonic_now() -> (Instant, u64) {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    let now = Instant::now();
    let ns = now.saturating_duration_since(epoch).as_nanos();
    (now, u64::try_from(ns).unwrap_or(u64::MAX))
}
