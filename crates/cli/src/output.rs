//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T]) {
    if items.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format a CFS quota/period in microseconds, `-` when unconstrained
pub fn format_micros(value: Option<u64>) -> String {
    match value {
        Some(us) => format!("{}us", us),
        None => "-".to_string(),
    }
}

/// Color a utilization percentage by how close it is to the allotment
pub fn color_percent(percent: f64) -> String {
    let formatted = format!("{:.1}%", percent);
    if percent >= 90.0 {
        formatted.red().to_string()
    } else if percent >= 70.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "available" | "active" | "ok" => status.green().to_string(),
        "degraded" | "fallback" => status.yellow().to_string(),
        "unavailable" | "error" | "disabled" => status.red().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00Ki");
        assert_eq!(format_bytes(64 * 1024 * 1024), "64.00Mi");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00Gi");
    }

    #[test]
    fn test_format_micros() {
        assert_eq!(format_micros(Some(100_000)), "100000us");
        assert_eq!(format_micros(None), "-");
    }

    #[test]
    fn test_color_percent_keeps_value() {
        assert!(color_percent(12.345).contains("12.3%"));
        assert!(color_percent(95.0).contains("95.0%"));
    }
}
