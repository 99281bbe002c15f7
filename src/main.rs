//! Unravel Impact - High-impact BigQuery query report
//!
//! A CLI tool that signs in to Unravel, collects the queries executed in a
//! lookback window, scores each one from its insights and writes a ranked
//! CSV report plus a top-10 subset.
//!
//! Exit codes:
//!   0 - Success (reports written, or dry run completed)
//!   1 - Fatal error (authentication, record count, search, config, etc.)

mod analysis;
mod api;
mod cli;
mod config;
mod error;
mod models;
mod report;

use analysis::ShrinkPolicy;
use anyhow::{Context, Result};
use api::{Credentials, UnravelClient};
use chrono::{DateTime, Local};
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use error::ReportError;
use report::ReportPaths;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Unravel Impact v{}", env!("CARGO_PKG_VERSION"));

    let run_start = Local::now();
    println!("Start  : {}", run_start.format("%H:%M:%S"));

    match run_report(args, run_start).await {
        Ok(exit_code) => {
            let finish = Local::now();
            println!("\nFinish : {}", finish.format("%H:%M:%S"));
            println!("Total execution time: {}", format_elapsed(finish - run_start));
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Report failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .unravel-impact.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the server URL, lookback window and output directory.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete report workflow. Returns the exit code.
async fn run_report(args: Args, run_start: DateTime<Local>) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().map_err(ReportError::Config)?;
    debug!("Effective configuration: {:?}", config);

    let window = config.search_window(run_start);
    info!(
        "Searching {} for queries from the last {} days",
        config.base_url(),
        window.lookback_days
    );
    let client = UnravelClient::new(&config.server)?;
    let credentials = Credentials {
        username: args.username.clone(),
        password: args.password.clone(),
    };

    println!("Stage 1: Generating authentication token");
    let token = client.sign_in(&credentials).await?;

    println!("Stage 2: Getting record count");
    let count = client.record_count(&token, &window).await?;
    match count.clusters {
        Some(clusters) => println!(
            "   Total query count: {}, from {} clusters",
            count.total, clusters
        ),
        None => println!("   Total query count: {}", count.total),
    }

    if args.dry_run {
        println!("\n✅ Dry run complete. No query data was fetched.");
        return Ok(0);
    }

    println!("Stage 3: Getting query IDs");
    let policy = ShrinkPolicy::from(&config.fetch);
    let fetched = analysis::fetch_references(&client, &token, &window, count.total, &policy).await?;
    if fetched.requested < count.total {
        warn!(
            "Working with {} of {} queries after reducing the request size",
            fetched.requested, count.total
        );
    }

    let stamp = report::file_timestamp(Local::now());
    let paths = ReportPaths::new(&config.output_dir(), config.report.top_n, &stamp);

    println!("Stage 4: Extracting required fields from API response data");
    println!("   {} query references extracted", fetched.references.len());
    if config.report.dump_sources {
        let content = report::render_references_csv(&fetched.references);
        match report::write_csv(&paths.references, &content) {
            Ok(()) => info!("Query references written to {}", paths.references.display()),
            Err(e) => warn!("Failed to write query references: {:#}", e),
        }
    }

    println!("Stage 5: Begin collecting query insight data");
    let (mut rows, summary) = analysis::enrich_references(
        &client,
        &token,
        &fetched.references,
        config.enrich.concurrency,
        !args.quiet,
    )
    .await;
    println!("   Collection of query insight data completed");

    println!("Stage 6: Ranking queries by impact");
    analysis::rank_rows(&mut rows);

    println!("Stage 7: Writing report files to disk");
    let written = report::write_reports(&rows, config.report.top_n, &paths);

    println!("\n📊 Report Summary:");
    println!("   Queries processed: {}", summary.processed);
    println!("   High-impact queries reported: {}", summary.reported);
    println!(
        "   Skipped - no insights: {} | below threshold: {} | failed: {}",
        summary.no_insights, summary.below_threshold, summary.failed
    );
    if let Some(ref path) = written.full {
        println!("   Full report: {}", path.display());
    }
    if let Some(ref path) = written.top {
        println!("   Top {} report: {}", config.report.top_n, path.display());
    }

    println!("Stage 8: Report generation completed!");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Format an elapsed duration as `H:MM:SS.ffffff`.
fn format_elapsed(elapsed: chrono::Duration) -> String {
    let micros = elapsed.num_microseconds().unwrap_or(0).max(0);
    let secs = micros / 1_000_000;
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        micros % 1_000_000
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_zero_count_stops_before_bulk_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/signIn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/apps/unifiedsearch"))
            .and(body_partial_json(json!({"size": 1})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"metadata": {"totalRecords": 0}, "results": []})),
            )
            .expect(1)
            .mount(&server)
            .await;
        // Any other search request would be a bulk fetch.
        Mock::given(method("POST"))
            .and(path("/api/v1/apps/unifiedsearch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
            .expect(0)
            .mount(&server)
            .await;

        let uri = server.uri();
        let output = tempfile::tempdir().unwrap();
        let args = Args::try_parse_from([
            "unravel-impact",
            "--base-url",
            uri.as_str(),
            "--output-dir",
            output.path().to_str().unwrap(),
            "--quiet",
        ])
        .unwrap();

        let err = run_report(args, Local::now()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReportError>(),
            Some(ReportError::ZeroRecords)
        ));
        assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(
            format_elapsed(chrono::Duration::microseconds(3_723_000_042)),
            "1:02:03.000042"
        );
        assert_eq!(format_elapsed(chrono::Duration::zero()), "0:00:00.000000");
    }
}
