//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.unravel-impact.toml` files.

use crate::models::{QueryStatus, SearchWindow};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".unravel-impact.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Unravel server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Query search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Bulk fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Per-query enrichment settings.
    #[serde(default)]
    pub enrich: EnrichConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Unravel server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the Unravel UI/API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout(),
            accept_invalid_certs: false,
        }
    }
}

fn default_base_url() -> String {
    "https://playground-dataproc.unraveldata.com".to_string()
}

fn default_timeout() -> u64 {
    120
}

/// Query search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of days to look back.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Application types to search for.
    #[serde(default = "default_app_types")]
    pub app_types: Vec<String>,

    /// Execution statuses to search for.
    #[serde(default = "default_statuses")]
    pub statuses: Vec<QueryStatus>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            app_types: default_app_types(),
            statuses: default_statuses(),
        }
    }
}

fn default_lookback_days() -> u32 {
    90
}

fn default_app_types() -> Vec<String> {
    vec!["bigquery".to_string()]
}

fn default_statuses() -> Vec<QueryStatus> {
    QueryStatus::ALL.to_vec()
}

/// Bulk fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Discount (percent) applied on the first reduced request.
    #[serde(default = "default_discount")]
    pub initial_discount: u32,

    /// Percentage points added to the discount on each further retry.
    #[serde(default = "default_discount")]
    pub discount_step: u32,

    /// Maximum number of reduced requests before giving up.
    #[serde(default = "default_max_shrink_attempts")]
    pub max_shrink_attempts: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            initial_discount: default_discount(),
            discount_step: default_discount(),
            max_shrink_attempts: default_max_shrink_attempts(),
        }
    }
}

fn default_discount() -> u32 {
    5
}

fn default_max_shrink_attempts() -> u32 {
    10
}

/// Per-query enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Number of analysis requests in flight at once (1 = sequential).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory the CSV reports are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Number of rows in the top report.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Also write the projected query references before enrichment.
    #[serde(default)]
    pub dump_sources: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            top_n: default_top_n(),
            dump_sources: false,
        }
    }
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_top_n() -> usize {
    10
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref base_url) = args.base_url {
            self.server.base_url = base_url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.server.timeout_seconds = timeout;
        }
        if args.insecure {
            self.server.accept_invalid_certs = true;
        }

        if let Some(days) = args.lookback_days {
            self.search.lookback_days = days;
        }
        if let Some(ref app_types) = args.app_types {
            self.search.app_types = app_types.clone();
        }

        if let Some(attempts) = args.max_shrink_attempts {
            self.fetch.max_shrink_attempts = attempts;
        }

        if let Some(concurrency) = args.concurrency {
            self.enrich.concurrency = concurrency;
        }

        if let Some(ref output_dir) = args.output_dir {
            self.report.output_dir = output_dir.display().to_string();
        }
        if let Some(top_n) = args.top_n {
            self.report.top_n = top_n;
        }
        if args.dump_sources {
            self.report.dump_sources = true;
        }
    }

    /// Check values the pipeline cannot work with.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let url = &self.server.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("Base URL must start with 'http://' or 'https://'".to_string());
        }
        if self.search.statuses.is_empty() {
            return Err("At least one query status must be searched".to_string());
        }
        if self.search.app_types.is_empty() {
            return Err("At least one app type must be searched".to_string());
        }
        if self.fetch.initial_discount == 0 || self.fetch.initial_discount >= 100 {
            return Err("Initial discount must be between 1 and 99 percent".to_string());
        }
        if self.fetch.discount_step == 0 {
            return Err("Discount step must be at least 1 percent".to_string());
        }
        if self.enrich.concurrency == 0 {
            return Err("Concurrency must be at least 1".to_string());
        }
        if self.report.top_n == 0 {
            return Err("Top report size must be at least 1".to_string());
        }
        if self.server.timeout_seconds == 0 {
            return Err("Timeout must be at least 1 second".to_string());
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }

    /// Build the search window for a run starting at `now`.
    pub fn search_window(&self, now: DateTime<Local>) -> SearchWindow {
        SearchWindow::ending_at(
            now,
            self.search.lookback_days,
            self.search.statuses.clone(),
            self.search.app_types.clone(),
        )
    }

    /// Output directory with a leading `~/` expanded to the home directory.
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.report.output_dir)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.search.lookback_days, 90);
        assert_eq!(config.search.app_types, vec!["bigquery"]);
        assert_eq!(config.search.statuses.len(), 7);
        assert_eq!(config.fetch.initial_discount, 5);
        assert_eq!(config.enrich.concurrency, 1);
        assert_eq!(config.report.top_n, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[server]
base_url = "https://unravel.example.com:3000/"
accept_invalid_certs = true

[search]
lookback_days = 30
statuses = ["F", "K"]

[report]
output_dir = "/tmp/reports"
top_n = 5
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.base_url(), "https://unravel.example.com:3000");
        assert!(config.server.accept_invalid_certs);
        assert_eq!(config.search.lookback_days, 30);
        assert_eq!(
            config.search.statuses,
            vec![QueryStatus::Failed, QueryStatus::Killed]
        );
        assert_eq!(config.search.app_types, vec!["bigquery"]);
        assert_eq!(config.report.output_dir, "/tmp/reports");
        assert_eq!(config.report.top_n, 5);
        assert_eq!(config.fetch.max_shrink_attempts, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.base_url = "unravel.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.statuses.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.initial_discount = 100;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.enrich.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values_from_file() {
        let config: Config = toml::from_str("[report]\ntop_n = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[fetch]\ndiscount_step = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[server]\ntimeout_seconds = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/reports"), PathBuf::from("/var/reports"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/reports"), PathBuf::from(home).join("reports"));
        }
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[search]"));
        assert!(toml_str.contains("[fetch]"));
        assert!(toml_str.contains("[report]"));
    }
}
