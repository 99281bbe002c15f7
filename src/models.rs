//! Data models for the impact report.
//!
//! This module contains the core data structures shared by the API client,
//! the aggregation pipeline and the report writer.

use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum cumulative impact a query needs to appear in the report.
pub const IMPACT_THRESHOLD: i64 = 30;

/// Impact classification of a cumulative impact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImpactLevel {
    /// 30 or below
    Low,
    /// Above 30, up to and including 70
    Medium,
    /// Above 70
    High,
}

impl ImpactLevel {
    /// Classify an impact value.
    pub fn classify(value: i64) -> Self {
        if value > 70 {
            ImpactLevel::High
        } else if value > 30 {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactLevel::Low => write!(f, "Low"),
            ImpactLevel::Medium => write!(f, "Medium"),
            ImpactLevel::High => write!(f, "High"),
        }
    }
}

/// Execution status of a query, keyed by the single-letter API code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryStatus {
    #[serde(rename = "K")]
    Killed,
    #[serde(rename = "F")]
    Failed,
    #[serde(rename = "R")]
    Running,
    #[serde(rename = "S")]
    Success,
    #[serde(rename = "P")]
    Pending,
    #[serde(rename = "U")]
    Unknown,
    #[serde(rename = "W")]
    Waiting,
}

impl QueryStatus {
    /// Every status, in the order the search filter sends them.
    pub const ALL: [QueryStatus; 7] = [
        QueryStatus::Killed,
        QueryStatus::Failed,
        QueryStatus::Running,
        QueryStatus::Success,
        QueryStatus::Pending,
        QueryStatus::Unknown,
        QueryStatus::Waiting,
    ];

    /// Single-letter code used by the search API.
    pub fn code(&self) -> &'static str {
        match self {
            QueryStatus::Killed => "K",
            QueryStatus::Failed => "F",
            QueryStatus::Running => "R",
            QueryStatus::Success => "S",
            QueryStatus::Pending => "P",
            QueryStatus::Unknown => "U",
            QueryStatus::Waiting => "W",
        }
    }

    /// Look up a status by its code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryStatus::Killed => "Killed",
            QueryStatus::Failed => "Failed",
            QueryStatus::Running => "Running",
            QueryStatus::Success => "Success",
            QueryStatus::Pending => "Pending",
            QueryStatus::Unknown => "Unknown",
            QueryStatus::Waiting => "Waiting",
        };
        write!(f, "{}", label)
    }
}

/// Human label for a raw status code. Codes outside the table pass through.
pub fn status_label(code: &str) -> String {
    QueryStatus::from_code(code)
        .map(|s| s.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// The time range and filters a run searches over.
///
/// Computed once at startup so the count probe and the bulk fetch see the
/// same window.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchWindow {
    pub lookback_days: u32,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub statuses: Vec<QueryStatus>,
    pub app_types: Vec<String>,
}

impl SearchWindow {
    /// Build a window ending at `now`.
    pub fn ending_at(
        now: DateTime<Local>,
        lookback_days: u32,
        statuses: Vec<QueryStatus>,
        app_types: Vec<String>,
    ) -> Self {
        Self {
            lookback_days,
            start_time: now - Duration::days(i64::from(lookback_days)),
            end_time: now,
            statuses,
            app_types,
        }
    }

    /// Status codes for the `appStatus` filter.
    pub fn status_codes(&self) -> Vec<&'static str> {
        self.statuses.iter().map(QueryStatus::code).collect()
    }
}

/// One discovered query, projected from a search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReference {
    pub id: String,
    #[serde(rename = "clusterId")]
    pub cluster_id: String,
    /// Cost in cents.
    pub cents: f64,
    /// Raw single-letter status code.
    pub status: String,
}

/// A named insight category from a query's analysis payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightCategory {
    pub name: String,
    pub impact: i64,
    pub instance_count: usize,
}

/// Impact totals for a single query, folded over its insight categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsightTally {
    /// Final running total across all categories.
    pub impact_value: i64,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub instance_count: usize,
    /// `"<name> (<running total>)"` per category, in payload order.
    pub labels: Vec<String>,
}

/// One row of the impact report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactReportRow {
    pub cluster_id: String,
    pub id: String,
    pub ui_link: String,
    pub cost_usd: f64,
    pub status: String,
    pub impact_value: i64,
    pub high_impact_count: usize,
    pub medium_impact_count: usize,
    pub low_impact_count: usize,
    pub instance_count: usize,
    pub insights: Vec<String>,
}

impl ImpactReportRow {
    /// Assemble a row from a reference and its tally.
    pub fn new(reference: &QueryReference, tally: InsightTally, ui_link: String) -> Self {
        Self {
            cluster_id: reference.cluster_id.clone(),
            id: reference.id.clone(),
            ui_link,
            cost_usd: reference.cents.round() / 100.0,
            status: status_label(&reference.status),
            impact_value: tally.impact_value,
            high_impact_count: tally.high,
            medium_impact_count: tally.medium,
            low_impact_count: tally.low,
            instance_count: tally.instance_count,
            insights: tally.labels,
        }
    }
}

/// Counts of what happened to each reference during enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub processed: usize,
    pub reported: usize,
    pub failed: usize,
    pub no_insights: usize,
    pub below_threshold: usize,
}
