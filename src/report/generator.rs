//! CSV report generation.
//!
//! This module renders ranked impact rows as CSV and writes the full and
//! top-N report files.

use crate::models::{ImpactReportRow, QueryReference};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Column headers shared by the full and top-N reports.
pub const REPORT_COLUMNS: [&str; 11] = [
    "clusterId",
    "id",
    "Unravel UI link",
    "Cost (USD)",
    "Status",
    "Impact Value",
    "High Impact",
    "Medium Impact",
    "Low Impact",
    "Instance Count",
    "Insights",
];

const REFERENCE_COLUMNS: [&str; 4] = ["id", "clusterId", "cents", "status"];

/// File name timestamp, down to the microsecond.
pub fn file_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%6f").to_string()
}

/// Where one run's report files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub full: PathBuf,
    pub top: PathBuf,
    pub references: PathBuf,
}

impl ReportPaths {
    /// Paths in `dir`, all stamped with the same `timestamp`.
    pub fn new(dir: &Path, top_n: usize, timestamp: &str) -> Self {
        Self {
            full: dir.join(format!("Impact_Report-{}.csv", timestamp)),
            top: dir.join(format!("Impact_Report-Top-{}-{}.csv", top_n, timestamp)),
            references: dir.join(format!("Query_References-{}.csv", timestamp)),
        }
    }
}

/// Render report rows as CSV, header included.
pub fn render_report_csv(rows: &[ImpactReportRow]) -> String {
    let mut output = String::new();
    output.push_str(&REPORT_COLUMNS.join(","));
    output.push('\n');

    for row in rows {
        let fields = [
            csv_escape(&row.cluster_id),
            csv_escape(&row.id),
            csv_escape(&row.ui_link),
            format!("{:.2}", row.cost_usd),
            csv_escape(&row.status),
            row.impact_value.to_string(),
            row.high_impact_count.to_string(),
            row.medium_impact_count.to_string(),
            row.low_impact_count.to_string(),
            row.instance_count.to_string(),
            csv_escape(&row.insights.join(", ")),
        ];
        output.push_str(&fields.join(","));
        output.push('\n');
    }

    output
}

/// Render query references as CSV, header included.
pub fn render_references_csv(references: &[QueryReference]) -> String {
    let mut output = String::new();
    output.push_str(&REFERENCE_COLUMNS.join(","));
    output.push('\n');

    for reference in references {
        output.push_str(&format!(
            "{},{},{},{}\n",
            csv_escape(&reference.id),
            csv_escape(&reference.cluster_id),
            reference.cents,
            csv_escape(&reference.status)
        ));
    }

    output
}

/// Escape a string for CSV (quote if contains comma, quote, or line break).
fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Write CSV content, creating the parent directory if needed.
pub fn write_csv(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// What got written by [`write_reports`].
#[derive(Debug, Default)]
pub struct WrittenReports {
    pub full: Option<PathBuf>,
    pub top: Option<PathBuf>,
}

/// Write the full report and the top-`top_n` report from ranked rows.
///
/// A failure writing one file is logged and does not stop the other.
pub fn write_reports(rows: &[ImpactReportRow], top_n: usize, paths: &ReportPaths) -> WrittenReports {
    let mut written = WrittenReports::default();

    match write_csv(&paths.full, &render_report_csv(rows)) {
        Ok(()) => {
            info!("Report of {} records output to: {}", rows.len(), paths.full.display());
            written.full = Some(paths.full.clone());
        }
        Err(e) => error!("Failure when writing complete data to CSV file: {:#}", e),
    }

    let top = crate::analysis::top_rows(rows, top_n);
    match write_csv(&paths.top, &render_report_csv(top)) {
        Ok(()) => {
            info!("Report of Top {} records output to: {}", top.len(), paths.top.display());
            written.top = Some(paths.top.clone());
        }
        Err(e) => error!("Failure when writing Top {} report to CSV file: {:#}", top_n, e),
    }

    written
}
