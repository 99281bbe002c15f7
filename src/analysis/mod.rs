//! The impact pipeline: bulk fetch, per-query enrichment and ranking.

pub mod aggregator;
pub mod enricher;
pub mod fetcher;

pub use aggregator::{rank_rows, top_rows};
pub use enricher::enrich_references;
pub use fetcher::{fetch_references, ShrinkPolicy};
