//! Per-query enrichment.
//!
//! Fetches the analysis of every reference and turns it into a report row.
//! A reference that cannot be enriched is skipped; the loop always moves on.

use crate::analysis::aggregator::build_row;
use crate::api::{AuthToken, UnravelClient};
use crate::error::SkipReason;
use crate::models::{EnrichmentSummary, ImpactReportRow, QueryReference};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

/// Enrich one reference.
pub async fn enrich_reference(
    client: &UnravelClient,
    token: &AuthToken,
    reference: &QueryReference,
) -> Result<ImpactReportRow, SkipReason> {
    let analysis = client.query_analysis(token, reference).await?;
    build_row(reference, &analysis, client.ui_link(reference))
}

/// Enrich every reference, keeping rows in input order.
///
/// Up to `concurrency` analysis requests are in flight at once; results are
/// collected in the order of `references` regardless.
pub async fn enrich_references(
    client: &UnravelClient,
    token: &AuthToken,
    references: &[QueryReference],
    concurrency: usize,
    show_progress: bool,
) -> (Vec<ImpactReportRow>, EnrichmentSummary) {
    info!("Retrieving insight data for {} queries", references.len());

    let progress = if show_progress {
        let pb = ProgressBar::new(references.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let outcomes: Vec<_> = stream::iter(references)
        .map(|reference| {
            let progress = &progress;
            async move {
                let outcome = enrich_reference(client, token, reference).await;
                progress.inc(1);
                (reference, outcome)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    progress.finish_and_clear();

    let mut rows = Vec::new();
    let mut summary = EnrichmentSummary::default();

    for (reference, outcome) in outcomes {
        summary.processed += 1;
        match outcome {
            Ok(row) => {
                summary.reported += 1;
                rows.push(row);
            }
            Err(reason) if reason.is_failure() => {
                summary.failed += 1;
                warn!(
                    "Failed to acquire insight data for query {} ({}): {}. Skipping",
                    reference.id, reference.cluster_id, reason
                );
            }
            Err(SkipReason::BelowThreshold(impact)) => {
                summary.below_threshold += 1;
                debug!(
                    "Query {} impact {} is below threshold, discarding",
                    reference.id, impact
                );
            }
            Err(_) => {
                summary.no_insights += 1;
                debug!("Query {} has no insights, skipping", reference.id);
            }
        }
    }

    info!(
        "Enriched {} queries: {} reported, {} without insights, {} below threshold, {} failed",
        summary.processed,
        summary.reported,
        summary.no_insights,
        summary.below_threshold,
        summary.failed
    );

    (rows, summary)
}
