//! Per-process CPU time and resident memory from procfs

use crate::error::{read_file, ReadError};
use crate::models::ProcessSample;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Instant;

/// Trait for reading a process's own counters
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn read(&self, pid: u32) -> Result<ProcessSample, ReadError>;
}

/// Fields of /proc/<pid>/stat the probe needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub comm: String,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
}

impl ProcStat {
    /// Parse /proc/<pid>/stat.
    ///
    /// The command name is wrapped in parentheses and may itself contain
    /// spaces or parentheses, so fields are counted from the last ')'.
    pub fn parse(content: &str) -> Result<Self, String> {
        let open = content.find('(').ok_or("missing '(' before comm")?;
        let close = content.rfind(')').ok_or("missing ')' after comm")?;
        if close < open {
            return Err("unbalanced comm parentheses".to_string());
        }

        let comm = content[open + 1..close].to_string();
        // Fields after comm start at field 3 (state); utime is 14, stime is 15
        let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
        let field = |n: usize| -> Result<u64, String> {
            let raw = rest
                .get(n - 3)
                .ok_or_else(|| format!("field {} missing", n))?;
            raw.parse()
                .map_err(|e| format!("invalid field {} '{}': {}", n, raw, e))
        };

        Ok(Self {
            comm,
            utime_ticks: field(14)?,
            stime_ticks: field(15)?,
        })
    }
}

/// Parse /proc/<pid>/statm, returning resident pages
pub fn parse_statm_resident(content: &str) -> Result<u64, String> {
    let raw = content
        .split_whitespace()
        .nth(1)
        .ok_or("resident field missing")?;
    raw.parse()
        .map_err(|e| format!("invalid resident '{}': {}", raw, e))
}

/// Probe backed by the Linux process table
pub struct ProcfsProbe {
    proc_root: PathBuf,
    clock_ticks_per_sec: u64,
    page_size: u64,
}

impl ProcfsProbe {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self::with_units(proc_root, clock_ticks_per_sec(), page_size())
    }

    /// Create a probe with explicit tick rate and page size (for testing)
    pub fn with_units(proc_root: impl Into<PathBuf>, clock_ticks_per_sec: u64, page_size: u64) -> Self {
        Self {
            proc_root: proc_root.into(),
            clock_ticks_per_sec: clock_ticks_per_sec.max(1),
            page_size,
        }
    }

    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        let ns = u128::from(ticks) * 1_000_000_000 / u128::from(self.clock_ticks_per_sec);
        u64::try_from(ns).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl ProcessProbe for ProcfsProbe {
    async fn read(&self, pid: u32) -> Result<ProcessSample, ReadError> {
        let pid_dir = self.proc_root.join(pid.to_string());

        let stat_path = pid_dir.join("stat");
        let stat = ProcStat::parse(&read_file(stat_path.clone()).await?)
            .map_err(|reason| ReadError::parse(&stat_path, reason))?;
        let captured_at = Instant::now();

        let statm_path = pid_dir.join("statm");
        let resident_pages = parse_statm_resident(&read_file(statm_path.clone()).await?)
            .map_err(|reason| ReadError::parse(&statm_path, reason))?;

        Ok(ProcessSample {
            pid,
            name: stat.comm,
            cpu_time_ns: self.ticks_to_ns(stat.utime_ticks + stat.stime_ticks),
            resident_memory_bytes: resident_pages.saturating_mul(self.page_size),
            captured_at,
        })
    }
}

/// Kernel clock ticks per second (USER_HZ)
pub fn clock_ticks_per_sec() -> u64 {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 {
        hz as u64
    } else {
        100
    }
}

/// Memory page size in bytes
pub fn page_size() -> u64 {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}
