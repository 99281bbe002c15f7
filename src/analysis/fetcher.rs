//! Bulk fetch of query references.
//!
//! The search endpoint sometimes answers an oversized request with a body
//! that is not a record-keyed object. When that happens the request is
//! repeated with a smaller size, following a bounded discount schedule.

use crate::api::{AuthToken, UnravelClient};
use crate::config::FetchConfig;
use crate::error::{ReportError, Result};
use crate::models::{QueryReference, SearchWindow};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Status code assumed when a result carries none.
const MISSING_STATUS: &str = "U";

/// Discount schedule for re-requesting a malformed search payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkPolicy {
    /// Percent taken off the total on the first retry.
    pub initial_discount: u32,
    /// Percentage points added per further retry.
    pub discount_step: u32,
    pub max_attempts: u32,
}

impl Default for ShrinkPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for ShrinkPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            initial_discount: config.initial_discount,
            discount_step: config.discount_step,
            max_attempts: config.max_shrink_attempts,
        }
    }
}

impl ShrinkPolicy {
    /// Discount in percent for retry `attempt` (1-based).
    pub fn discount_for_attempt(&self, attempt: u32) -> u64 {
        u64::from(self.initial_discount)
            + u64::from(attempt.saturating_sub(1)) * u64::from(self.discount_step)
    }

    /// Size to request on retry `attempt`, always discounted from the
    /// original total. `None` once the schedule is exhausted.
    pub fn size_for_attempt(&self, total: u64, attempt: u32) -> Option<u64> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let discount = self.discount_for_attempt(attempt);
        if discount >= 100 {
            return None;
        }
        let size = (total as f64 * (100 - discount) as f64 / 100.0).round() as u64;
        (size > 0).then_some(size)
    }
}

/// References from a successful bulk fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub references: Vec<QueryReference>,
    /// Size of the request that produced a usable payload.
    pub requested: u64,
}

/// Fetch `total` references, shrinking the request while the payload is
/// malformed.
pub async fn fetch_references(
    client: &UnravelClient,
    token: &AuthToken,
    window: &SearchWindow,
    total: u64,
    policy: &ShrinkPolicy,
) -> Result<FetchOutcome> {
    let mut size = total;
    let (mut payload, mut diagnostics) = client.unified_search(token, window, size).await?;
    let mut attempt = 0;

    while !payload.is_object() {
        attempt += 1;
        let Some(next) = policy.size_for_attempt(total, attempt) else {
            return Err(ReportError::ShrinkExhausted {
                attempts: attempt - 1,
                last_size: size,
                diagnostics,
            });
        };

        warn!(
            "Incorrect data type returned. Reducing requested record count by {}%",
            policy.discount_for_attempt(attempt)
        );
        size = next;
        (payload, diagnostics) = client.unified_search(token, window, size).await?;
    }

    let references = project_results(&payload)?;
    info!(
        "Extracted {} query references from a request of {}",
        references.len(),
        size
    );

    Ok(FetchOutcome {
        references,
        requested: size,
    })
}

/// Project the `results` of a search payload down to query references.
///
/// Results without an id or cluster id are dropped.
pub fn project_results(payload: &Value) -> Result<Vec<QueryReference>> {
    let results = payload
        .get("results")
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| no_results(payload))?;

    let mut references = Vec::with_capacity(results.len());
    for (index, result) in results.iter().enumerate() {
        match project_result(result) {
            Some(reference) => references.push(reference),
            None => warn!("Skipping search result {} without id or clusterId", index),
        }
    }

    debug!("Projected {} of {} results", references.len(), results.len());
    if references.is_empty() {
        return Err(no_results(payload));
    }
    Ok(references)
}

fn no_results(payload: &Value) -> ReportError {
    ReportError::NoResults {
        fields: payload
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default(),
    }
}

fn project_result(result: &Value) -> Option<QueryReference> {
    Some(QueryReference {
        id: scalar_string(result.get("id")?)?,
        cluster_id: scalar_string(result.get("clusterId")?)?,
        cents: result.get("cents").and_then(Value::as_f64).unwrap_or(0.0),
        status: result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or(MISSING_STATUS)
            .to_string(),
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
