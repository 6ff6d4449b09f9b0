//! cgroup v1 counter source (legacy hierarchy)
//!
//! Reads per-controller directories under the cgroup root:
//! - cpuacct.usage for cumulative CPU usage in nanoseconds
//! - cpu.cfs_quota_us / cpu.cfs_period_us for the CFS allotment

use super::{monotonic_now, online_cpus, CounterSource};
use crate::error::{read_file, ReadError};
use crate::models::{RawCounterSample, SourceKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Controller directories that may carry cpuacct files, most common first
const CPUACCT_DIRS: &[&str] = &["cpu,cpuacct", "cpuacct"];

/// Controller directories that may carry the CFS files
const CPU_DIRS: &[&str] = &["cpu", "cpu,cpuacct"];

/// Counter source for the legacy cgroup v1 hierarchy
pub struct CgroupV1Source {
    /// Root path for cgroup v1 controllers (typically /sys/fs/cgroup)
    cgroup_root: PathBuf,
    host_cpus: u32,
}

impl CgroupV1Source {
    pub fn new(cgroup_root: impl Into<PathBuf>, host_cpus: u32) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            host_cpus,
        }
    }

    /// Parse a single-value cgroup file such as cpuacct.usage or cpu.cfs_quota_us
    pub fn parse_value<T: std::str::FromStr>(content: &str) -> Result<T, String>
    where
        T::Err: std::fmt::Display,
    {
        let value = content.trim();
        value
            .parse()
            .map_err(|e| format!("invalid value '{}': {}", value, e))
    }

    /// Read CPU usage from cpuacct.usage (nanoseconds)
    async fn read_cpu_usage(&self) -> Result<u64, ReadError> {
        let mut last_err = None;

        for dir in CPUACCT_DIRS {
            let path = self.cgroup_root.join(dir).join("cpuacct.usage");
            match read_file(path.clone()).await {
                Ok(content) => {
                    return Self::parse_value(&content)
                        .map_err(|reason| ReadError::parse(&path, reason));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ReadError::parse(&self.cgroup_root, "no cpuacct controller directory")
        }))
    }

    /// Read (quota_usec, period_usec); quota of -1 means unconstrained
    async fn read_cfs_limits(&self) -> Result<(Option<i64>, Option<u64>), ReadError> {
        for dir in CPU_DIRS {
            let cpu_path = self.cgroup_root.join(dir);
            let quota_path = cpu_path.join("cpu.cfs_quota_us");
            let Ok(quota_content) = read_file(quota_path.clone()).await else {
                continue;
            };

            let quota: i64 = Self::parse_value(&quota_content)
                .map_err(|reason| ReadError::parse(&quota_path, reason))?;
            let period = Self::read_period(&cpu_path).await?;

            let quota = if quota < 0 { None } else { Some(quota) };
            return Ok((quota, period));
        }

        Ok((None, None))
    }

    async fn read_period(cpu_path: &Path) -> Result<Option<u64>, ReadError> {
        let period_path = cpu_path.join("cpu.cfs_period_us");
        match read_file(period_path.clone()).await {
            Ok(content) => Self::parse_value(&content)
                .map(Some)
                .map_err(|reason| ReadError::parse(&period_path, reason)),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl CounterSource for CgroupV1Source {
    async fn read(&self) -> Result<RawCounterSample, ReadError> {
        let usage_ns = self.read_cpu_usage().await?;
        let (captured_at, wall_ns) = monotonic_now();
        let (quota_usec, period_usec) = self.read_cfs_limits().await?;

        let quota_ns = quota_usec.map(|q| q.saturating_mul(1_000));
        let period_ns = period_usec.map(|p| p.saturating_mul(1_000));

        Ok(RawCounterSample {
            active_ticks_or_ns: usage_ns,
            total_ticks_or_ns: wall_ns,
            quota_ns,
            period_ns,
            online_cpus: online_cpus(quota_ns, period_ns, self.host_cpus),
            captured_at,
            source_kind: SourceKind::CgroupV1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpuacct_usage() {
        let usage: u64 = CgroupV1Source::parse_value("5000000000\n").unwrap();
        assert_eq!(usage, 5_000_000_000);
    }

    #[test]
    fn test_parse_unlimited_quota() {
        let quota: i64 = CgroupV1Source::parse_value("-1\n").unwrap();
        assert_eq!(quota, -1);
    }

    #[test]
    fn test_parse_value_invalid() {
        assert!(CgroupV1Source::parse_value::<u64>("").is_err());
        assert!(CgroupV1Source::parse_value::<u64>("-5").is_err());
        assert!(CgroupV1Source::parse_value::<i64>("abc").is_err());
    }

    #[tokio::test]
    async fn test_read_nonexistent_root() {
        let source = CgroupV1Source::new("/nonexistent/path", 4);
        let err = source.read().await.unwrap_err();
        assert!(err.is_fallthrough());
    }
}
