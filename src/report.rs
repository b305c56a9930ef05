//! Output tables, the route locations report and the run summary.
//!
//! Everything here is a plain serialization of values computed elsewhere;
//! nothing is recomputed while writing.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::centroid::maps_url;
use crate::error::{Result, RouteStatsError};
use crate::records::AnnotatedRecord;
use crate::stats::RouteStats;
use crate::GpsPoint;

pub const ROUTE_STATS_FILE: &str = "route_stats.csv";
pub const ANNOTATED_FILE: &str = "activities_with_routes.csv";
pub const LOCATIONS_FILE: &str = "route_locations.txt";
pub const SUMMARY_FILE: &str = "summary.json";

/// Column appended to the cleaned activity log.
pub const ROUTE_ID_COLUMN: &str = "GPS_RouteID";

const RULE_WIDTH: usize = 70;

/// A route's centroid and the place name it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLocation {
    pub route_id: u32,
    pub centroid: GpsPoint,
    pub name: String,
    /// Member tracks
    pub n_tracks: usize,
}

/// Counters describing one run, end to end.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub files_seen: usize,
    pub tracks_loaded: usize,
    pub files_skipped: usize,
    pub tracks_vectorized: usize,
    pub degenerate_tracks: usize,
    pub eps_used: f64,
    pub retried: bool,
    pub clusters: usize,
    pub noise_tracks: usize,
    pub records_read: usize,
    pub records_matched: usize,
    pub records_unresolved: usize,
    pub records_on_noise: usize,
    pub routes_with_stats: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Tracks: {} loaded, {} skipped of {} files ({} too short to vectorize)",
            self.tracks_loaded, self.files_skipped, self.files_seen, self.degenerate_tracks
        )?;
        writeln!(
            f,
            "Clusters: {} routes, {} noise tracks (eps {}{})",
            self.clusters,
            self.noise_tracks,
            self.eps_used,
            if self.retried { ", retried" } else { "" }
        )?;
        writeln!(
            f,
            "Records: {} read, {} matched, {} unresolved, {} on noise tracks",
            self.records_read, self.records_matched, self.records_unresolved, self.records_on_noise
        )?;
        write!(f, "Routes with statistics: {}", self.routes_with_stats)
    }
}

/// Write the per-route statistics table, one row per route.
pub fn write_route_stats_csv(path: impl AsRef<Path>, stats: &[RouteStats]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    if stats.is_empty() {
        writer.write_record(ROUTE_STATS_HEADER)?;
    }
    for row in stats {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| RouteStatsError::io(path, e))
}

/// Header of the statistics table, used when there are no rows to
/// serialize it from.
const ROUTE_STATS_HEADER: [&str; 9] = [
    "RouteID",
    "Pace_min_per_mile_mean",
    "Pace_min_per_mile_median",
    "Pace_min_per_mile_std",
    "Average Grade Adjusted Pace_mean",
    "Elevation Gain_mean",
    "Relative Effort_mean",
    "Distance_mean",
    "Distance_count",
];

/// Write the cleaned activity log with a route id column.
///
/// The route id is left empty for unresolved records and for records that
/// matched a noise track.
pub fn write_annotated_csv(path: impl AsRef<Path>, records: &[AnnotatedRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record([
        crate::records::COL_ACTIVITY_ID,
        crate::records::COL_DATE,
        crate::records::COL_NAME,
        crate::records::COL_FILENAME,
        crate::records::COL_DISTANCE,
        crate::records::COL_MOVING_TIME,
        crate::records::COL_SPEED,
        crate::records::COL_ELEVATION_GAIN,
        crate::records::COL_GAP,
        crate::records::COL_RELATIVE_EFFORT,
        ROUTE_ID_COLUMN,
    ])?;

    for annotated in records {
        let r = &annotated.record;
        writer.write_record([
            r.activity_id.clone().unwrap_or_default(),
            r.date.clone().unwrap_or_default(),
            r.name.clone().unwrap_or_default(),
            r.filename.clone().unwrap_or_default(),
            r.distance.to_string(),
            cell(r.moving_time),
            r.average_speed.to_string(),
            cell(r.elevation_gain),
            cell(r.grade_adjusted_pace),
            cell(r.relative_effort),
            annotated
                .route_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
        ])?;
    }
    writer.flush().map_err(|e| RouteStatsError::io(path, e))
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Render the route locations report.
///
/// A short line per route, followed by a detailed block per route with
/// full-precision coordinates and a map link.
pub fn render_route_locations(locations: &[RouteLocation]) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    out.push_str(&format!("{}\nROUTE CLUSTERS - GENERAL LOCATIONS\n{}\n\n", rule, rule));
    for loc in locations {
        out.push_str(&format!(
            "Route {:3} → {} ({:.4}, {:.4})\n",
            loc.route_id, loc.name, loc.centroid.latitude, loc.centroid.longitude
        ));
    }

    out.push_str(&format!("\n{}\nCLUSTER IDS AND COORDINATES\n{}\n\n", rule, rule));
    for loc in locations {
        out.push_str(&format!("Route {}: {}\n", loc.route_id, loc.name));
        out.push_str(&format!("  Tracks: {}\n", loc.n_tracks));
        out.push_str(&format!("  Latitude: {:.6}\n", loc.centroid.latitude));
        out.push_str(&format!("  Longitude: {:.6}\n", loc.centroid.longitude));
        out.push_str(&format!("  Maps: {}\n\n", maps_url(&loc.centroid)));
    }
    out
}

pub fn write_route_locations(path: impl AsRef<Path>, locations: &[RouteLocation]) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, render_route_locations(locations)).map_err(|e| RouteStatsError::io(path, e))
}

/// Write the run summary as pretty-printed JSON.
pub fn write_summary_json(path: impl AsRef<Path>, summary: &RunSummary) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| RouteStatsError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary).map_err(|e| RouteStatsError::Internal {
        message: format!("Failed to serialize summary: {}", e),
    })?;
    writer.flush().map_err(|e| RouteStatsError::io(path, e))
}
