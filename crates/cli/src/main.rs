//! Container usage CLI
//!
//! Inspect which CPU counters this host exposes and take ad-hoc usage
//! samples with the same math the agent uses.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{detect, sample};
use std::path::PathBuf;
use std::time::Duration;
use usage_engine::SourceConfig;

/// Container usage CLI
#[derive(Parser)]
#[command(name = "cusage")]
#[command(author, version, about = "CLI for the container usage engine", long_about = None)]
pub struct Cli {
    /// cgroup filesystem root
    #[arg(long, env = "USAGE_CGROUP_ROOT", default_value = "/sys/fs/cgroup", global = true)]
    pub cgroup_root: PathBuf,

    /// procfs root
    #[arg(long, env = "USAGE_PROC_ROOT", default_value = "/proc", global = true)]
    pub proc_root: PathBuf,

    /// Do not fall back to host-wide /proc/stat when no cgroup counters are readable
    #[arg(long, global = true)]
    pub no_fallback: bool,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn source_config(&self) -> SourceConfig {
        SourceConfig {
            cgroup_root: self.cgroup_root.clone(),
            proc_root: self.proc_root.clone(),
            enable_proc_stat_fallback: !self.no_fallback,
            host_cpus: None,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which counter source is in use, with quota, period and CPU allotment
    Detect,

    /// Take usage samples at a fixed interval
    Sample {
        /// Number of intervals to report
        #[arg(long, short = 'n', default_value_t = 5)]
        count: u32,

        /// Seconds between samples
        #[arg(long, short, default_value_t = 1.0)]
        interval: f64,

        /// Process to report on (defaults to this CLI)
        #[arg(long)]
        pid: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let source_config = cli.source_config();

    match cli.command {
        Commands::Detect => {
            detect::detect(&source_config, cli.format).await?;
        }
        Commands::Sample {
            count,
            interval,
            pid,
        } => {
            if !(interval > 0.0 && interval.is_finite()) {
                anyhow::bail!("--interval must be a positive number of seconds");
            }
            let interval = match Duration::try_from_secs_f64(interval) {
                Ok(interval) => interval,
                Err(e) => anyhow::bail!("--interval {} is out of range: {}", interval, e),
            };
            let pid = pid.unwrap_or_else(std::process::id);
            sample::sample(&source_config, pid, count, interval, cli.format).await?;
        }
    }

    Ok(())
}
