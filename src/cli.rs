//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Unravel Impact - high-impact BigQuery query report
///
/// Signs in to Unravel, collects every query from the lookback window,
/// scores each one from its insights and writes a ranked CSV report plus
/// a top-10 subset.
///
/// Credentials are read from the `unravel_username` and
/// `unravel_password` environment variables.
///
/// Examples:
///   unravel-impact
///   unravel-impact --base-url https://unravel.example.com:3000 --lookback-days 30
///   unravel-impact --output-dir ~/reports --concurrency 4
///   unravel-impact --dry-run
///   unravel-impact --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Unravel base URL
    ///
    /// Overrides `server.base_url` from the config file.
    #[arg(long, value_name = "URL", env = "UNRAVEL_URL")]
    pub base_url: Option<String>,

    /// Unravel username
    #[arg(long, env = "unravel_username", hide_env_values = true)]
    pub username: Option<String>,

    /// Unravel password
    #[arg(long, env = "unravel_password", hide_env_values = true)]
    pub password: Option<String>,

    /// Number of days to look back
    #[arg(long, value_name = "DAYS")]
    pub lookback_days: Option<u32>,

    /// Application types to search for (comma-separated)
    #[arg(long, value_name = "TYPES", value_delimiter = ',')]
    pub app_types: Option<Vec<String>>,

    /// Directory to write the reports to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of rows in the top report
    #[arg(long, value_name = "COUNT")]
    pub top_n: Option<usize>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .unravel-impact.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Maximum number of reduced bulk requests on a malformed response
    #[arg(long, value_name = "COUNT")]
    pub max_shrink_attempts: Option<u32>,

    /// Number of analysis requests in flight at once
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Also write the query references fetched before enrichment
    #[arg(long)]
    pub dump_sources: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: sign in and count matching queries, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .unravel-impact.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.top_n == Some(0) {
            return Err("Top report size must be at least 1".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
