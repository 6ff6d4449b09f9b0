//! Counter source detection

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use usage_engine::source::{
    host_cpu_count, CgroupV1Source, CgroupV2Source, ProcStatSource,
};
use usage_engine::{CounterSource, RawCounterSample, SourceConfig, SourceKind, TieredCounterSource};

use crate::output::{color_status, format_micros, print_json, print_table, print_warning, OutputFormat};

/// Result of probing one tier
#[derive(Debug, Serialize, Tabled)]
struct TierRow {
    #[tabled(rename = "Tier")]
    kind: SourceKind,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Debug, Serialize)]
struct DetectReport {
    active: Option<SourceKind>,
    scope: Option<&'static str>,
    quota_us: Option<u64>,
    period_us: Option<u64>,
    online_cpus: Option<u32>,
    host_cpus: u32,
    tiers: Vec<TierRow>,
}

async fn probe(kind: SourceKind, source: &dyn CounterSource) -> TierRow {
    match source.read().await {
        Ok(sample) => TierRow {
            kind,
            status: "available".to_string(),
            detail: format!("{} online CPUs", sample.online_cpus),
        },
        Err(e) => TierRow {
            kind,
            status: "unavailable".to_string(),
            detail: e.to_string(),
        },
    }
}

fn micros(ns: Option<u64>) -> Option<u64> {
    ns.map(|ns| ns / 1_000)
}

/// Probe every tier, then report the one the engine would pick
pub async fn detect(config: &SourceConfig, format: OutputFormat) -> Result<()> {
    let host_cpus = config.host_cpus.unwrap_or_else(host_cpu_count);

    let mut tiers = vec![
        probe(
            SourceKind::CgroupV2,
            &CgroupV2Source::new(&config.cgroup_root, host_cpus),
        )
        .await,
        probe(
            SourceKind::CgroupV1,
            &CgroupV1Source::new(&config.cgroup_root, host_cpus),
        )
        .await,
    ];
    if config.enable_proc_stat_fallback {
        tiers.push(
            probe(
                SourceKind::ProcStat,
                &ProcStatSource::new(&config.proc_root, host_cpus),
            )
            .await,
        );
    } else {
        tiers.push(TierRow {
            kind: SourceKind::ProcStat,
            status: "disabled".to_string(),
            detail: "fallback turned off".to_string(),
        });
    }

    let selected: Option<RawCounterSample> = TieredCounterSource::new(&SourceConfig {
        host_cpus: Some(host_cpus),
        ..config.clone()
    })
    .read()
    .await
    .ok();

    let report = DetectReport {
        active: selected.as_ref().map(|s| s.source_kind),
        scope: selected.as_ref().map(|s| s.source_kind.scope()),
        quota_us: micros(
            selected
                .as_ref()
                .and_then(|s| s.quota_ns)
                .and_then(|q| u64::try_from(q).ok()),
        ),
        period_us: micros(selected.as_ref().and_then(|s| s.period_ns)),
        online_cpus: selected.as_ref().map(|s| s.online_cpus),
        host_cpus,
        tiers,
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    if report.active.is_none() {
        anyhow::bail!("no usable counter source");
    }
    Ok(())
}

fn print_report(report: &DetectReport) {
    println!("{}", "Counter Sources".bold());
    println!("{}", "=".repeat(50));

    let rows: Vec<TierRow> = report
        .tiers
        .iter()
        .map(|t| TierRow {
            kind: t.kind,
            status: color_status(&t.status),
            detail: t.detail.clone(),
        })
        .collect();
    print_table(&rows);
    println!();

    let Some(active) = report.active else {
        print_warning("No usable counter source on this host");
        return;
    };

    println!("Active Source:  {}", active.to_string().cyan());
    println!("Scope:          {}", report.scope.unwrap_or("-"));
    println!("Quota:          {}", format_micros(report.quota_us));
    println!("Period:         {}", format_micros(report.period_us));
    println!(
        "Online CPUs:    {}",
        report.online_cpus.map(|c| c.to_string()).unwrap_or_default()
    );
    println!("Host CPUs:      {}", report.host_cpus);

    if !active.is_container_scoped() {
        println!();
        print_warning("Figures are host-wide, not limited to this container");
    }
}
