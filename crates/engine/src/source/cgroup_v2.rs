//! cgroup v2 counter source
//!
//! Reads the unified hierarchy mounted at the cgroup root:
//! - cpu.stat for cumulative CPU usage (`usage_usec`)
//! - cpu.max for the CFS quota and period

use super::{monotonic_now, online_cpus, CounterSource};
use crate::error::{read_file, ReadError};
use crate::models::{RawCounterSample, SourceKind};
use async_trait::async_trait;
use std::path::PathBuf;

/// Counter source for the cgroup v2 unified hierarchy
pub struct CgroupV2Source {
    cgroup_root: PathBuf,
    host_cpus: u32,
}

impl CgroupV2Source {
    pub fn new(cgroup_root: impl Into<PathBuf>, host_cpus: u32) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            host_cpus,
        }
    }

    /// Parse cpu.stat file contents
    /// Returns usage_usec
    pub fn parse_cpu_stat(content: &str) -> Result<u64, String> {
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if parts.next() != Some("usage_usec") {
                continue;
            }
            let value = parts.next().ok_or("usage_usec has no value")?;
            return value
                .parse()
                .map_err(|e| format!("invalid usage_usec '{}': {}", value, e));
        }

        Err("usage_usec not found".to_string())
    }

    /// Parse cpu.max file contents
    /// Returns (quota_usec, period_usec); quota is `None` for "max"
    pub fn parse_cpu_max(content: &str) -> Result<(Option<i64>, Option<u64>), String> {
        let parts: Vec<&str> = content.split_whitespace().collect();

        let (quota, period) = match parts.as_slice() {
            [quota] => (*quota, None),
            [quota, period] => (*quota, Some(*period)),
            _ => return Err(format!("expected '<quota> <period>', got '{}'", content.trim())),
        };

        let quota = if quota == "max" {
            None
        } else {
            Some(
                quota
                    .parse::<i64>()
                    .map_err(|e| format!("invalid quota '{}': {}", quota, e))?,
            )
        };

        let period = period
            .map(|p| {
                p.parse::<u64>()
                    .map_err(|e| format!("invalid period '{}': {}", p, e))
            })
            .transpose()?;

        Ok((quota, period))
    }
}

#[async_trait]
impl CounterSource for CgroupV2Source {
    async fn read(&self) -> Result<RawCounterSample, ReadError> {
        let stat_path = self.cgroup_root.join("cpu.stat");
        let content = read_file(stat_path.clone()).await?;
        let usage_usec =
            Self::parse_cpu_stat(&content).map_err(|reason| ReadError::parse(&stat_path, reason))?;
        let (captured_at, wall_ns) = monotonic_now();

        // The root cgroup has no cpu.max; treat that as unconstrained
        let max_path = self.cgroup_root.join("cpu.max");
        let (quota_usec, period_usec) = match read_file(max_path.clone()).await {
            Ok(content) => Self::parse_cpu_max(&content)
                .map_err(|reason| ReadError::parse(&max_path, reason))?,
            Err(_) => (None, None),
        };

        let quota_ns = quota_usec.map(|q| q.saturating_mul(1_000));
        let period_ns = period_usec.map(|p| p.saturating_mul(1_000));

        Ok(RawCounterSample {
            active_ticks_or_ns: usage_usec.saturating_mul(1_000),
            total_ticks_or_ns: wall_ns,
            quota_ns,
            period_ns,
            online_cpus: online_cpus(quota_ns, period_ns, self.host_cpus),
            captured_at,
            source_kind: SourceKind::CgroupV2,
        })
    }
}
