//! CPU utilization from pairs of cumulative counter samples
//!
//! Percentages are always normalized to `[0, 100]`:
//! - cgroup sources: CPU nanoseconds consumed over wall-clock nanoseconds
//!   elapsed, divided by the CPUs the container is allotted
//! - `/proc/stat`: active ticks over total ticks, already summed over every CPU

use crate::error::ReadError;
use crate::models::{ProcessSample, RawCounterSample, SourceKind, UsageResult};
use tracing::debug;

/// Computes container CPU percentages and remembers the last good result,
/// which is returned again when an interval has to be discarded.
#[derive(Debug, Default)]
pub struct UsageCalculator {
    last: Option<UsageResult>,
}

impl UsageCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent result handed out
    pub fn last(&self) -> Option<UsageResult> {
        self.last
    }

    /// Compute utilization between two ordered samples.
    ///
    /// A counter that moved backwards, or a pair read from different tiers,
    /// discards the interval: the previous result comes back unchanged with
    /// `degraded` set.
    pub fn compute(&mut self, prev: &RawCounterSample, curr: &RawCounterSample) -> UsageResult {
        if is_discontinuity(prev, curr) {
            debug!(
                prev_source = %prev.source_kind,
                curr_source = %curr.source_kind,
                "Discarding interval after counter discontinuity"
            );
            let result = match self.last {
                Some(last) => UsageResult {
                    degraded: true,
                    ..last
                },
                None => UsageResult {
                    percent: 0.0,
                    basis: curr.source_kind,
                    computed_at: curr.captured_at,
                    degraded: true,
                },
            };
            self.last = Some(result);
            return result;
        }

        let active_delta = curr.active_ticks_or_ns - prev.active_ticks_or_ns;
        let total_delta = curr.total_ticks_or_ns - prev.total_ticks_or_ns;

        let result = UsageResult {
            percent: utilization_percent(
                active_delta,
                total_delta,
                curr.online_cpus,
                curr.source_kind,
            ),
            basis: curr.source_kind,
            computed_at: curr.captured_at,
            degraded: !curr.source_kind.is_container_scoped(),
        };
        self.last = Some(result);
        result
    }
}

/// `CounterReset` when a counter of the same source moved backwards
pub fn check_continuity(prev: &RawCounterSample, curr: &RawCounterSample) -> Result<(), ReadError> {
    if curr.source_kind == prev.source_kind
        && (curr.active_ticks_or_ns < prev.active_ticks_or_ns
            || curr.total_ticks_or_ns < prev.total_ticks_or_ns)
    {
        return Err(ReadError::CounterReset {
            kind: curr.source_kind,
        });
    }
    Ok(())
}

fn is_discontinuity(prev: &RawCounterSample, curr: &RawCounterSample) -> bool {
    curr.source_kind != prev.source_kind || check_continuity(prev, curr).is_err()
}

/// Normalized utilization for non-negative deltas
pub fn utilization_percent(
    active_delta: u64,
    total_delta: u64,
    online_cpus: u32,
    kind: SourceKind,
) -> f64 {
    if total_delta == 0 {
        return 0.0;
    }

    let percent = active_delta as f64 * 100.0 / total_delta as f64;
    let percent = match kind {
        SourceKind::ProcStat => percent,
        SourceKind::CgroupV2 | SourceKind::CgroupV1 => percent / f64::from(online_cpus.max(1)),
    };

    percent.clamp(0.0, 100.0)
}

/// Process CPU time over wall-clock time as a share of one logical core.
///
/// Returns `None` when the samples cannot be compared (pid changed or the
/// CPU-time counter went backwards).
pub fn process_cpu_percent(prev: &ProcessSample, curr: &ProcessSample) -> Option<f64> {
    if prev.pid != curr.pid || curr.cpu_time_ns < prev.cpu_time_ns {
        return None;
    }

    let wall_ns = curr
        .captured_at
        .saturating_duration_since(prev.captured_at)
        .as_nanos();
    if wall_ns == 0 {
        return Some(0.0);
    }

    let cpu_ns = curr.cpu_time_ns - prev.cpu_time_ns;
    Some((cpu_ns as f64 * 100.0 / wall_ns as f64).clamp(0.0, 100.0))
}
