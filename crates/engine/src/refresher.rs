//! Periodic refresh loop
//!
//! Reads the counter source and process probe on a fixed interval, turns
//! consecutive readings into percentages and publishes a fresh snapshot.
//! Read failures are logged and reflected in the snapshot's `degraded`
//! flag; they never stop the loop.

use crate::calculator::{check_continuity, process_cpu_percent, UsageCalculator};
use crate::error::ReadError;
use crate::models::{MetricsSnapshot, ProcessSample, RawCounterSample};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::process::{ProcessProbe, ProcfsProbe};
use crate::source::{host_cpu_count, CounterSource, SourceConfig, TieredCounterSource};
use crate::store::SampleStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Refresh interval (default: 5 seconds)
    pub interval: Duration,
    /// Process whose CPU time and memory are reported (default: this process)
    pub pid: u32,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            pid: std::process::id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherState {
    Collecting,
    Stopped,
}

/// What a single refresh did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fresh, non-degraded snapshot published
    Published,
    /// Snapshot published but some figure is carried over, primed or from fallback
    Degraded,
    /// Every read failed; prior snapshot kept and marked degraded
    KeptPrevious,
}

/// Refresh loop owning the previous readings between ticks
pub struct Refresher {
    source: Arc<dyn CounterSource>,
    probe: Arc<dyn ProcessProbe>,
    store: SampleStore,
    config: RefresherConfig,
    calculator: UsageCalculator,
    prev_counters: Option<RawCounterSample>,
    prev_process: Option<ProcessSample>,
    state: RefresherState,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Refresher {
    pub fn new(
        source: Arc<dyn CounterSource>,
        probe: Arc<dyn ProcessProbe>,
        store: SampleStore,
        config: RefresherConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            source,
            probe,
            store,
            config,
            calculator: UsageCalculator::new(),
            prev_counters: None,
            prev_process: None,
            state: RefresherState::Collecting,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    pub fn state(&self) -> RefresherState {
        self.state
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn config(&self) -> &RefresherConfig {
        &self.config
    }

    /// Refresh on every tick until a shutdown message arrives or the sender is dropped
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        if self.state == RefresherState::Stopped {
            return;
        }

        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            pid = self.config.pid,
            "Starting usage refresh loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down usage refresh loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh_once().await;
                }
            }
        }

        self.state = RefresherState::Stopped;
        self.prev_counters = None;
        self.prev_process = None;
    }

    /// Take one pair of readings and publish the result
    pub async fn refresh_once(&mut self) -> RefreshOutcome {
        let start = Instant::now();

        let counters = self.source.read().await;
        let process = self.probe.read(self.config.pid).await;

        if let Err(e) = &counters {
            self.metrics.inc_refresh_errors("counter_source");
            self.metrics.set_source_tier(None);
            self.logger.log_read_failure("counter_source", e);
        }
        if let Err(e) = &process {
            self.metrics.inc_refresh_errors("process_probe");
            self.logger.log_read_failure("process_probe", e);
        }

        let prior = self.store.read();

        let outcome = match (counters, process) {
            (Err(_), Err(_)) => {
                self.store.publish(MetricsSnapshot {
                    degraded: true,
                    ..prior
                });
                RefreshOutcome::KeptPrevious
            }
            (counters, process) => {
                let mut snapshot = prior;
                let counters_read = counters.is_ok();

                let counters_degraded = match counters {
                    Ok(curr) => self.apply_counters(curr, &mut snapshot),
                    Err(_) => true,
                };
                let process_degraded = match process {
                    Ok(curr) => self.apply_process(curr, &mut snapshot),
                    Err(_) => true,
                };

                snapshot.degraded = counters_degraded || process_degraded;
                // Freshness follows the counter source; process-only refreshes age out
                if counters_read {
                    snapshot.last_updated = Some(Utc::now());
                }
                self.logger.log_snapshot(&snapshot);

                let degraded = snapshot.degraded;
                self.store.publish(snapshot);

                if degraded {
                    RefreshOutcome::Degraded
                } else {
                    RefreshOutcome::Published
                }
            }
        };

        self.metrics.observe_refresh_latency(start.elapsed());
        outcome
    }

    /// Fold a counter reading into the snapshot; returns whether the figure is degraded
    fn apply_counters(&mut self, curr: RawCounterSample, snapshot: &mut MetricsSnapshot) -> bool {
        self.metrics.set_source_tier(Some(curr.source_kind));
        snapshot.online_cpus = curr.online_cpus;

        let Some(prev) = self.prev_counters.replace(curr.clone()) else {
            // First reading only primes the baseline
            snapshot.source = Some(curr.source_kind);
            return true;
        };

        if let Err(ReadError::CounterReset { kind }) = check_continuity(&prev, &curr) {
            self.metrics.inc_counter_resets();
            self.logger.log_counter_reset(kind);
        }

        let result = self.calculator.compute(&prev, &curr);
        snapshot.system_or_container_cpu_pct = result.percent;
        // A carried-over figure keeps the scope it was measured under
        snapshot.source = Some(result.basis);
        result.degraded
    }

    /// Fold a process reading into the snapshot; returns whether the figure is degraded
    fn apply_process(&mut self, curr: ProcessSample, snapshot: &mut MetricsSnapshot) -> bool {
        snapshot.pid = curr.pid;
        snapshot.process_name = curr.name.clone();
        snapshot.process_memory_bytes = curr.resident_memory_bytes;

        let Some(prev) = self.prev_process.replace(curr.clone()) else {
            return true;
        };

        match process_cpu_percent(&prev, &curr) {
            Some(percent) => {
                snapshot.process_cpu_pct = percent;
                false
            }
            None => true,
        }
    }
}

/// Builder for the refresh loop
pub struct RefresherBuilder {
    source: Option<Arc<dyn CounterSource>>,
    probe: Option<Arc<dyn ProcessProbe>>,
    store: Option<SampleStore>,
    source_config: SourceConfig,
    config: RefresherConfig,
    service_name: String,
}

impl RefresherBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            probe: None,
            store: None,
            source_config: SourceConfig::default(),
            config: RefresherConfig::default(),
            service_name: "unknown_service".to_string(),
        }
    }

    /// Set the counter source (default: tiered source built from `source_config`)
    pub fn source(mut self, source: Arc<dyn CounterSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the process probe (default: procfs probe under `source_config.proc_root`)
    pub fn probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Share an existing store instead of creating one
    pub fn store(mut self, store: SampleStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn source_config(mut self, source_config: SourceConfig) -> Self {
        self.source_config = source_config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.config.pid = pid;
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn build(self) -> Result<Refresher> {
        if self.config.interval.is_zero() {
            anyhow::bail!("Refresh interval must be greater than zero");
        }

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(TieredCounterSource::new(&self.source_config)));
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ProcfsProbe::new(&self.source_config.proc_root)));
        let host_cpus = self.source_config.host_cpus.unwrap_or_else(host_cpu_count);
        let store = self
            .store
            .unwrap_or_else(|| SampleStore::new(MetricsSnapshot::initial(self.config.pid, host_cpus)));

        Ok(Refresher::new(
            source,
            probe,
            store,
            self.config,
            StructuredLogger::new(self.service_name),
        ))
    }
}

impl Default for RefresherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant as StdInstant;

    /// Counter source replaying scripted readings; empty script means failure
    struct ScriptedSource {
        readings: Mutex<VecDeque<Option<RawCounterSample>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(readings: Vec<Option<RawCounterSample>>) -> Arc<Self> {
            Arc::new(Self {
                readings: Mutex::new(readings.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CounterSource for ScriptedSource {
        async fn read(&self) -> Result<RawCounterSample, ReadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.readings
                .lock()
                .unwrap()
                .pop_front()
                .flatten()
                .ok_or(ReadError::AllSourcesExhausted { attempts: vec![] })
        }
    }

    struct ScriptedProbe {
        readings: Mutex<VecDeque<Option<ProcessSample>>>,
    }

    impl ScriptedProbe {
        fn new(readings: Vec<Option<ProcessSample>>) -> Arc<Self> {
            Arc::new(Self {
                readings: Mutex::new(readings.into()),
            })
        }
    }

    #[async_trait]
    impl ProcessProbe for ScriptedProbe {
        async fn read(&self, pid: u32) -> Result<ProcessSample, ReadError> {
            self.readings
                .lock()
                .unwrap()
                .pop_front()
                .flatten()
                .ok_or_else(|| ReadError::parse(format!("/proc/{}/stat", pid), "gone"))
        }
    }

    fn counters(kind: SourceKind, active: u64, total: u64, at: StdInstant) -> Option<RawCounterSample> {
        Some(RawCounterSample {
            active_ticks_or_ns: active,
            total_ticks_or_ns: total,
            quota_ns: None,
            period_ns: None,
            online_cpus: 1,
            captured_at: at,
            source_kind: kind,
        })
    }

    fn process(cpu_time_ns: u64, rss: u64, at: StdInstant) -> Option<ProcessSample> {
        Some(ProcessSample {
            pid: 42,
            name: "svc".to_string(),
            cpu_time_ns,
            resident_memory_bytes: rss,
            captured_at: at,
        })
    }

    fn refresher(
        source: Arc<dyn CounterSource>,
        probe: Arc<dyn ProcessProbe>,
    ) -> Refresher {
        RefresherBuilder::new()
            .source(source)
            .probe(probe)
            .pid(42)
            .source_config(SourceConfig {
                host_cpus: Some(4),
                ..SourceConfig::default()
            })
            .service_name("test")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_tick_primes_baseline() {
        let t0 = StdInstant::now();
        let mut refresher = refresher(
            ScriptedSource::new(vec![counters(SourceKind::CgroupV2, 0, 0, t0)]),
            ScriptedProbe::new(vec![process(0, 1024, t0)]),
        );

        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);

        let snapshot = refresher.store().read();
        assert!(snapshot.degraded);
        assert!(snapshot.last_updated.is_some());
        assert_eq!(snapshot.process_memory_bytes, 1024);
        assert_eq!(snapshot.system_or_container_cpu_pct, 0.0);
        assert_eq!(snapshot.source, Some(SourceKind::CgroupV2));
    }

    #[tokio::test]
    async fn test_second_tick_publishes_percentages() {
        let t0 = StdInstant::now();
        let t1 = t0 + Duration::from_secs(1);
        let mut refresher = refresher(
            ScriptedSource::new(vec![
                counters(SourceKind::CgroupV2, 0, 0, t0),
                counters(SourceKind::CgroupV2, 1_000_000_000, 1_000_000_000, t1),
            ]),
            ScriptedProbe::new(vec![
                process(0, 1024, t0),
                process(250_000_000, 2048, t1),
            ]),
        );

        refresher.refresh_once().await;
        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Published);

        let snapshot = refresher.store().read();
        assert!(!snapshot.degraded);
        assert!((snapshot.system_or_container_cpu_pct - 100.0).abs() < 1e-9);
        assert!((snapshot.process_cpu_pct - 25.0).abs() < 1e-9);
        assert_eq!(snapshot.process_memory_bytes, 2048);
        assert_eq!(snapshot.pid, 42);
        assert_eq!(snapshot.process_name, "svc");
        assert_eq!(snapshot.scope(), "container");
    }

    #[tokio::test]
    async fn test_total_failure_keeps_previous_snapshot() {
        let t0 = StdInstant::now();
        let t1 = t0 + Duration::from_secs(1);
        let mut refresher = refresher(
            ScriptedSource::new(vec![
                counters(SourceKind::CgroupV2, 0, 0, t0),
                counters(SourceKind::CgroupV2, 500_000_000, 1_000_000_000, t1),
                None,
            ]),
            ScriptedProbe::new(vec![process(0, 1, t0), process(0, 1, t1), None]),
        );

        refresher.refresh_once().await;
        refresher.refresh_once().await;
        let before = refresher.store().read();
        assert!(!before.degraded);

        assert_eq!(refresher.refresh_once().await, RefreshOutcome::KeptPrevious);

        let after = refresher.store().read();
        assert!(after.degraded);
        assert_eq!(after.last_updated, before.last_updated);
        assert_eq!(after.system_or_container_cpu_pct, 50.0);
    }

    #[tokio::test]
    async fn test_partial_failure_publishes_degraded() {
        let t0 = StdInstant::now();
        let t1 = t0 + Duration::from_secs(1);
        let mut refresher = refresher(
            ScriptedSource::new(vec![
                counters(SourceKind::CgroupV2, 0, 0, t0),
                counters(SourceKind::CgroupV2, 500_000_000, 1_000_000_000, t1),
            ]),
            ScriptedProbe::new(vec![process(0, 1, t0), None]),
        );

        refresher.refresh_once().await;
        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);

        let snapshot = refresher.store().read();
        assert!(snapshot.degraded);
        assert_eq!(snapshot.system_or_container_cpu_pct, 50.0);
        assert_eq!(snapshot.process_memory_bytes, 1);
    }

    #[tokio::test]
    async fn test_counter_reset_keeps_percentage_and_recovers() {
        let t0 = StdInstant::now();
        let at = |s: u64| t0 + Duration::from_secs(s);
        let mut refresher = refresher(
            ScriptedSource::new(vec![
                counters(SourceKind::CgroupV2, 0, 0, at(0)),
                counters(SourceKind::CgroupV2, 300_000_000, 1_000_000_000, at(1)),
                // Container restarted: usage starts over
                counters(SourceKind::CgroupV2, 10, 2_000_000_000, at(2)),
                counters(SourceKind::CgroupV2, 600_000_010, 3_000_000_000, at(3)),
            ]),
            ScriptedProbe::new(vec![
                process(0, 1, at(0)),
                process(0, 1, at(1)),
                process(0, 1, at(2)),
                process(0, 1, at(3)),
            ]),
        );

        refresher.refresh_once().await;
        refresher.refresh_once().await;
        assert_eq!(refresher.store().read().system_or_container_cpu_pct, 30.0);

        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);
        let snapshot = refresher.store().read();
        assert!(snapshot.degraded);
        assert_eq!(snapshot.system_or_container_cpu_pct, 30.0);

        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Published);
        assert_eq!(refresher.store().read().system_or_container_cpu_pct, 60.0);
    }

    #[tokio::test]
    async fn test_proc_stat_fallback_is_degraded_system_scope() {
        let t0 = StdInstant::now();
        let t1 = t0 + Duration::from_secs(1);
        let mut refresher = refresher(
            ScriptedSource::new(vec![
                counters(SourceKind::ProcStat, 150, 1000, t0),
                counters(SourceKind::ProcStat, 165, 1100, t1),
            ]),
            ScriptedProbe::new(vec![process(0, 1, t0), process(0, 1, t1)]),
        );

        refresher.refresh_once().await;
        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);

        let snapshot = refresher.store().read();
        assert_eq!(snapshot.system_or_container_cpu_pct, 15.0);
        assert_eq!(snapshot.scope(), "system");
        assert!(snapshot.degraded);
    }

    #[tokio::test]
    async fn test_exhausted_source_with_live_process_goes_stale() {
        let t0 = StdInstant::now();
        let at = |s: u64| t0 + Duration::from_secs(s);
        let mut refresher = refresher(
            ScriptedSource::new(vec![None, None, None]),
            ScriptedProbe::new(vec![
                process(0, 1024, at(0)),
                process(100_000_000, 2048, at(1)),
                process(200_000_000, 4096, at(2)),
            ]),
        );

        for _ in 0..3 {
            assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);
        }

        let snapshot = refresher.store().read();
        assert!(snapshot.degraded);
        assert_eq!(snapshot.last_updated, None);
        assert_eq!(snapshot.source, None);
        assert_eq!(snapshot.process_memory_bytes, 4096);

        let callback = crate::callback::MetricCallback::new(
            refresher.store().clone(),
            "test",
            Duration::from_secs(5),
        );
        assert!(callback
            .observe()
            .iter()
            .all(|r| r.name != crate::callback::CONTAINER_CPU_USAGE));
    }

    #[tokio::test]
    async fn test_source_loss_freezes_last_updated() {
        let t0 = StdInstant::now();
        let at = |s: u64| t0 + Duration::from_secs(s);
        let mut refresher = refresher(
            ScriptedSource::new(vec![
                counters(SourceKind::CgroupV2, 0, 0, at(0)),
                counters(SourceKind::CgroupV2, 400_000_000, 1_000_000_000, at(1)),
                None,
                None,
            ]),
            ScriptedProbe::new(vec![
                process(0, 1, at(0)),
                process(0, 1, at(1)),
                process(0, 2, at(2)),
                process(0, 3, at(3)),
            ]),
        );

        refresher.refresh_once().await;
        refresher.refresh_once().await;
        let stamp = refresher.store().read().last_updated;
        assert!(stamp.is_some());

        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);
        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);

        let snapshot = refresher.store().read();
        assert_eq!(snapshot.last_updated, stamp);
        assert_eq!(snapshot.system_or_container_cpu_pct, 40.0);
        assert_eq!(snapshot.process_memory_bytes, 3);
        assert!(snapshot.degraded);
    }

    #[tokio::test]
    async fn test_tier_switch_keeps_scope_of_carried_figure() {
        let t0 = StdInstant::now();
        let at = |s: u64| t0 + Duration::from_secs(s);
        let mut refresher = refresher(
            ScriptedSource::new(vec![
                counters(SourceKind::CgroupV2, 0, 0, at(0)),
                counters(SourceKind::CgroupV2, 700_000_000, 1_000_000_000, at(1)),
                counters(SourceKind::ProcStat, 150, 1000, at(2)),
                counters(SourceKind::ProcStat, 165, 1100, at(3)),
            ]),
            ScriptedProbe::new(vec![
                process(0, 1, at(0)),
                process(0, 1, at(1)),
                process(0, 1, at(2)),
                process(0, 1, at(3)),
            ]),
        );

        refresher.refresh_once().await;
        refresher.refresh_once().await;

        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Degraded);
        let switched = refresher.store().read();
        assert_eq!(switched.system_or_container_cpu_pct, 70.0);
        assert_eq!(switched.source, Some(SourceKind::CgroupV2));
        assert_eq!(switched.scope(), "container");

        refresher.refresh_once().await;
        let settled = refresher.store().read();
        assert_eq!(settled.system_or_container_cpu_pct, 15.0);
        assert_eq!(settled.scope(), "system");
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = RefresherBuilder::new().interval(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_refresher_config_default() {
        let config = RefresherConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.pid, std::process::id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let source = ScriptedSource::new(vec![]);
        let mut refresher = RefresherBuilder::new()
            .source(source.clone())
            .probe(ScriptedProbe::new(vec![]))
            .interval(Duration::from_secs(5))
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move {
            refresher.run(shutdown_rx).await;
            refresher
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown_tx.send(()).unwrap();
        let refresher = handle.await.unwrap();

        assert_eq!(refresher.state(), RefresherState::Stopped);
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        // Failures never stop the loop, they only mark the snapshot
        assert!(refresher.store().read().degraded);
    }

    #[tokio::test]
    async fn test_stopped_refresher_does_not_restart() {
        let source = ScriptedSource::new(vec![]);
        let mut refresher = RefresherBuilder::new()
            .source(source.clone())
            .probe(ScriptedProbe::new(vec![]))
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        drop(shutdown_tx);
        refresher.run(shutdown_rx).await;
        assert_eq!(refresher.state(), RefresherState::Stopped);

        let (_tx, rx) = broadcast::channel(1);
        refresher.run(rx).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
