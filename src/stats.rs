//! Per-route statistics.
//!
//! Records are grouped by the route their identifier resolved to and
//! summarised into one [`RouteStats`] row per route. Unresolved records and
//! records that resolved to a noise track are left out.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::records::{ActivityRecord, AnnotatedRecord};

/// mph per m/s
pub const MPS_TO_MPH: f64 = 2.237;

/// Aggregates for one route, flattened to `<field>_<aggregate>` columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStats {
    #[serde(rename = "RouteID")]
    pub route_id: u32,
    #[serde(rename = "Pace_min_per_mile_mean")]
    pub pace_mean: Option<f64>,
    #[serde(rename = "Pace_min_per_mile_median")]
    pub pace_median: Option<f64>,
    #[serde(rename = "Pace_min_per_mile_std")]
    pub pace_std: Option<f64>,
    #[serde(rename = "Average Grade Adjusted Pace_mean")]
    pub grade_adjusted_pace_mean: Option<f64>,
    #[serde(rename = "Elevation Gain_mean")]
    pub elevation_gain_mean: Option<f64>,
    #[serde(rename = "Relative Effort_mean")]
    pub relative_effort_mean: Option<f64>,
    #[serde(rename = "Distance_mean")]
    pub distance_mean: f64,
    #[serde(rename = "Distance_count")]
    pub distance_count: usize,
}

/// Pace in minutes per mile from a speed in m/s, rounded to 2 decimals.
///
/// Non-positive speeds have no pace.
pub fn pace_min_per_mile(speed_mps: f64) -> Option<f64> {
    if speed_mps.is_nan() || speed_mps <= 0.0 {
        return None;
    }
    let pace = 60.0 / (speed_mps * MPS_TO_MPH);
    Some((pace * 100.0).round() / 100.0)
}

/// Group matched records by route and compute [`RouteStats`] per route,
/// ordered by route id. The input is not modified.
pub fn compute_route_stats(records: &[AnnotatedRecord]) -> Vec<RouteStats> {
    let mut groups: BTreeMap<u32, Vec<&ActivityRecord>> = BTreeMap::new();
    for annotated in records {
        if let Some(route) = annotated.route_id() {
            groups.entry(route).or_default().push(&annotated.record);
        }
    }

    groups
        .into_iter()
        .map(|(route_id, members)| {
            let paces: Vec<f64> = members
                .iter()
                .filter_map(|r| pace_min_per_mile(r.average_speed))
                .collect();
            let distances: Vec<f64> = members.iter().map(|r| r.distance).collect();

            RouteStats {
                route_id,
                pace_mean: mean(&paces),
                pace_median: median(&paces),
                pace_std: sample_std(&paces),
                grade_adjusted_pace_mean: mean_of(&members, |r| r.grade_adjusted_pace),
                elevation_gain_mean: mean_of(&members, |r| r.elevation_gain),
                relative_effort_mean: mean_of(&members, |r| r.relative_effort),
                distance_mean: mean(&distances).unwrap_or(0.0),
                distance_count: distances.len(),
            }
        })
        .collect()
}

/// Mean of the present values of an optional field.
fn mean_of<F>(records: &[&ActivityRecord], field: F) -> Option<f64>
where
    F: Fn(&ActivityRecord) -> Option<f64>,
{
    let values: Vec<f64> = records.iter().filter_map(|r| field(r)).collect();
    mean(&values)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Sample standard deviation (n - 1); undefined below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

// ============================================================================
// Rankings
// ============================================================================

/// Routes with the lowest mean pace first.
pub fn fastest_routes(stats: &[RouteStats], top_n: usize) -> Vec<&RouteStats> {
    ranked(stats, top_n, |s| s.pace_mean, false)
}

/// Routes with the highest mean elevation gain first.
pub fn hardest_routes(stats: &[RouteStats], top_n: usize) -> Vec<&RouteStats> {
    ranked(stats, top_n, |s| s.elevation_gain_mean, true)
}

/// Routes with the lowest pace standard deviation first.
pub fn most_consistent_routes(stats: &[RouteStats], top_n: usize) -> Vec<&RouteStats> {
    ranked(stats, top_n, |s| s.pace_std, false)
}

/// Sort by a metric, skipping routes where it is missing. Ties keep route order.
fn ranked<F>(stats: &[RouteStats], top_n: usize, metric: F, descending: bool) -> Vec<&RouteStats>
where
    F: Fn(&RouteStats) -> Option<f64>,
{
    let mut rows: Vec<(f64, &RouteStats)> = stats
        .iter()
        .filter_map(|s| metric(s).map(|m| (m, s)))
        .collect();
    rows.sort_by(|a, b| {
        let ord = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    rows.into_iter().take(top_n).map(|(_, s)| s).collect()
}
