//! Ad-hoc usage sampling

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;
use usage_engine::{
    process_cpu_percent, CounterSource, ProcessProbe, ProcfsProbe, SourceConfig, SourceKind,
    TieredCounterSource, UsageCalculator,
};

use crate::output::{
    color_percent, format_bytes, print_json, print_success, print_table, OutputFormat,
};

/// One reported interval
#[derive(Debug, Serialize)]
struct SampleRow {
    index: u32,
    timestamp: String,
    source: SourceKind,
    scope: &'static str,
    container_cpu_pct: f64,
    /// `None` when the process counters could not be compared
    process_cpu_pct: Option<f64>,
    process_memory_bytes: u64,
    online_cpus: u32,
    degraded: bool,
}

/// Row for the samples table
#[derive(Tabled)]
struct SampleTableRow {
    #[tabled(rename = "#")]
    index: u32,
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "CPU")]
    container_cpu: String,
    #[tabled(rename = "Process CPU")]
    process_cpu: String,
    #[tabled(rename = "RSS")]
    memory: String,
    #[tabled(rename = "CPUs")]
    online_cpus: u32,
}

impl From<&SampleRow> for SampleTableRow {
    fn from(row: &SampleRow) -> Self {
        let source = if row.degraded {
            format!("{} ({})", row.source, row.scope).yellow().to_string()
        } else {
            format!("{} ({})", row.source, row.scope)
        };

        Self {
            index: row.index,
            timestamp: row.timestamp.clone(),
            source,
            container_cpu: color_percent(row.container_cpu_pct),
            process_cpu: row
                .process_cpu_pct
                .map(color_percent)
                .unwrap_or_else(|| "-".to_string()),
            memory: format_bytes(row.process_memory_bytes),
            online_cpus: row.online_cpus,
        }
    }
}

/// Take `count` samples `interval` apart and report each interval's usage
pub async fn sample(
    config: &SourceConfig,
    pid: u32,
    count: u32,
    interval: Duration,
    format: OutputFormat,
) -> Result<()> {
    let source = TieredCounterSource::new(config);
    let probe = ProcfsProbe::new(&config.proc_root);
    let mut calculator = UsageCalculator::new();

    let mut prev_counters = source.read().await.context("Failed to read CPU counters")?;
    let mut prev_process = probe
        .read(pid)
        .await
        .with_context(|| format!("Failed to read process {}", pid))?;

    if let OutputFormat::Table = format {
        println!(
            "Sampling {} ({}) every {:.1}s",
            prev_process.name.cyan(),
            pid,
            interval.as_secs_f64()
        );
    }

    let mut rows = Vec::with_capacity(count as usize);
    for index in 1..=count {
        tokio::time::sleep(interval).await;

        let counters = source.read().await.context("Failed to read CPU counters")?;
        let process = probe
            .read(pid)
            .await
            .with_context(|| format!("Failed to read process {}", pid))?;

        let usage = calculator.compute(&prev_counters, &counters);
        let process_cpu = process_cpu_percent(&prev_process, &process);

        rows.push(SampleRow {
            index,
            timestamp: Utc::now().format("%H:%M:%S").to_string(),
            source: usage.basis,
            scope: usage.basis.scope(),
            container_cpu_pct: usage.percent,
            process_cpu_pct: process_cpu,
            process_memory_bytes: process.resident_memory_bytes,
            online_cpus: counters.online_cpus,
            degraded: usage.degraded || process_cpu.is_none(),
        });

        prev_counters = counters;
        prev_process = process;
    }

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Table => {
            let table_rows: Vec<SampleTableRow> = rows.iter().map(SampleTableRow::from).collect();
            print_table(&table_rows);
            if !rows.is_empty() {
                print_success(&format!("Collected {} samples", rows.len()));
            }
        }
    }

    Ok(())
}
