//! System-wide fallback source reading the aggregate line of /proc/stat

use super::CounterSource;
use crate::error::{read_file, ReadError};
use crate::models::{RawCounterSample, SourceKind};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Instant;

/// Tick counters from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTicks {
    pub fn active(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }

    pub fn total(&self) -> u64 {
        self.active() + self.idle + self.iowait
    }

    /// Parse the first line of /proc/stat.
    ///
    /// Format: "cpu  user nice system idle iowait irq softirq steal guest guest_nice".
    /// Kernels before 2.6.11 omit steal, which then reads as zero.
    pub fn parse(content: &str) -> Result<Self, String> {
        let line = content.lines().next().ok_or("empty file")?;
        let mut parts = line.split_whitespace();

        if parts.next() != Some("cpu") {
            return Err(format!("first line is not the aggregate cpu line: '{}'", line));
        }

        let values = parts
            .take(8)
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|e| format!("invalid tick count '{}': {}", v, e))
            })
            .collect::<Result<Vec<u64>, String>>()?;

        if values.len() < 7 {
            return Err(format!(
                "expected at least 7 tick counters, got {}",
                values.len()
            ));
        }

        Ok(Self {
            user: values[0],
            nice: values[1],
            system: values[2],
            idle: values[3],
            iowait: values[4],
            irq: values[5],
            softirq: values[6],
            steal: values.get(7).copied().unwrap_or(0),
        })
    }
}

/// Host-wide counter source; it has no notion of a container quota
pub struct ProcStatSource {
    proc_root: PathBuf,
    host_cpus: u32,
}

impl ProcStatSource {
    pub fn new(proc_root: impl Into<PathBuf>, host_cpus: u32) -> Self {
        Self {
            proc_root: proc_root.into(),
            host_cpus,
        }
    }
}

#[async_trait]
impl CounterSource for ProcStatSource {
    async fn read(&self) -> Result<RawCounterSample, ReadError> {
        let path = self.proc_root.join("stat");
        let content = read_file(path.clone()).await?;
        let ticks = CpuTicks::parse(&content).map_err(|reason| ReadError::parse(&path, reason))?;

        Ok(RawCounterSample {
            active_ticks_or_ns: ticks.active(),
            total_ticks_or_ns: ticks.total(),
            quota_ns: None,
            period_ns: None,
            online_cpus: self.host_cpus.max(1),
            captured_at: Instant::now(),
            source_kind: SourceKind::ProcStat,
        })
    }
}
