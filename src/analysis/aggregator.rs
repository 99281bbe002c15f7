//! Impact aggregation and ranking.
//!
//! Folds a query's insight categories into an impact tally, turns the
//! survivors into report rows and ranks them.

use crate::error::SkipReason;
use crate::models::{
    ImpactLevel, ImpactReportRow, InsightCategory, InsightTally, QueryReference, IMPACT_THRESHOLD,
};
use serde_json::{Map, Value};

/// Extract the insight categories of an analysis payload, in payload order.
///
/// `insightsV2` is accepted either as an object keyed by category name or
/// as an array of `{"categories": {...}}` entries, which are flattened.
pub fn parse_insight_categories(
    analysis: &Map<String, Value>,
) -> Result<Vec<InsightCategory>, SkipReason> {
    let categories = match analysis.get("insightsV2") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => parse_category_map(map)?,
        Some(Value::Array(entries)) => {
            let mut all = Vec::new();
            for entry in entries {
                let map = entry
                    .get("categories")
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        SkipReason::MalformedInsights("entry without a categories object".into())
                    })?;
                all.extend(parse_category_map(map)?);
            }
            all
        }
        Some(other) => {
            return Err(SkipReason::MalformedInsights(format!(
                "unexpected insightsV2 value: {}",
                other
            )))
        }
    };

    if categories.is_empty() {
        return Err(SkipReason::NoInsights);
    }
    Ok(categories)
}

fn parse_category_map(map: &Map<String, Value>) -> Result<Vec<InsightCategory>, SkipReason> {
    map.iter()
        .map(|(name, body)| {
            let impact = body
                .get("impact")
                .and_then(impact_as_i64)
                .ok_or_else(|| {
                    SkipReason::MalformedInsights(format!("category {} has no numeric impact", name))
                })?;

            let instance_count = match body.get("instances") {
                None | Some(Value::Null) => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => {
                    return Err(SkipReason::MalformedInsights(format!(
                        "category {} has non-list instances",
                        name
                    )))
                }
            };

            Ok(InsightCategory {
                name: name.clone(),
                impact,
                instance_count,
            })
        })
        .collect()
}

fn impact_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Fold categories into a tally.
///
/// The impact total runs across categories in order. Each label carries the
/// running total at that category, and each High/Medium/Low count classifies
/// the running total rather than the category's own impact.
pub fn tally_insights(categories: &[InsightCategory]) -> Result<InsightTally, SkipReason> {
    let mut tally = InsightTally::default();

    for category in categories {
        tally.impact_value = tally
            .impact_value
            .checked_add(category.impact)
            .ok_or_else(|| {
                SkipReason::MalformedInsights(format!(
                    "impact total overflows at category {}",
                    category.name
                ))
            })?;
        tally
            .labels
            .push(format!("{} ({})", category.name, tally.impact_value));

        match ImpactLevel::classify(tally.impact_value) {
            ImpactLevel::High => tally.high += 1,
            ImpactLevel::Medium => tally.medium += 1,
            ImpactLevel::Low => tally.low += 1,
        }

        tally.instance_count += category.instance_count;
    }

    Ok(tally)
}

/// Build the report row for one query, or say why there is none.
pub fn build_row(
    reference: &QueryReference,
    analysis: &Map<String, Value>,
    ui_link: String,
) -> Result<ImpactReportRow, SkipReason> {
    let categories = parse_insight_categories(analysis)?;
    let tally = tally_insights(&categories)?;

    if tally.impact_value < IMPACT_THRESHOLD {
        return Err(SkipReason::BelowThreshold(tally.impact_value));
    }

    Ok(ImpactReportRow::new(reference, tally, ui_link))
}

/// Sort rows by impact, highest first. Ties keep their input order.
pub fn rank_rows(rows: &mut [ImpactReportRow]) {
    rows.sort_by(|a, b| b.impact_value.cmp(&a.impact_value));
}

/// The first `n` rows of a ranked slice.
pub fn top_rows(rows: &[ImpactReportRow], n: usize) -> &[ImpactReportRow] {
    &rows[..rows.len().min(n)]
}
