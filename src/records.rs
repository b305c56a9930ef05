//! Activity log ingestion.
//!
//! Reads a Strava-style `activities.csv`. Such exports repeat some headers
//! (`Distance`, `Elevation Gain`, ...) with different units, so columns are
//! located by the first header with a given name instead of deserializing
//! whole rows.

use std::path::Path;

use csv::StringRecord;
use log::{info, warn};
use serde::Serialize;

use crate::config::{IdField, RecordFilter};
use crate::error::{Result, RouteStatsError};
use crate::matcher::Resolution;

pub const COL_ACTIVITY_ID: &str = "Activity ID";
pub const COL_FILENAME: &str = "Filename";
pub const COL_NAME: &str = "Activity Name";
pub const COL_DATE: &str = "Activity Date";
pub const COL_TYPE: &str = "Activity Type";
pub const COL_DISTANCE: &str = "Distance";
pub const COL_MOVING_TIME: &str = "Moving Time";
pub const COL_SPEED: &str = "Average Speed";
pub const COL_ELEVATION_GAIN: &str = "Elevation Gain";
pub const COL_GAP: &str = "Average Grade Adjusted Pace";
pub const COL_RELATIVE_EFFORT: &str = "Relative Effort";

/// One row of the activity log, after cleaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityRecord {
    #[serde(rename = "Activity ID")]
    pub activity_id: Option<String>,
    #[serde(rename = "Filename")]
    pub filename: Option<String>,
    #[serde(rename = "Activity Name")]
    pub name: Option<String>,
    #[serde(rename = "Activity Date")]
    pub date: Option<String>,
    #[serde(rename = "Distance")]
    pub distance: f64,
    /// Seconds
    #[serde(rename = "Moving Time")]
    pub moving_time: Option<f64>,
    /// Meters per second
    #[serde(rename = "Average Speed")]
    pub average_speed: f64,
    #[serde(rename = "Elevation Gain")]
    pub elevation_gain: Option<f64>,
    #[serde(rename = "Average Grade Adjusted Pace")]
    pub grade_adjusted_pace: Option<f64>,
    #[serde(rename = "Relative Effort")]
    pub relative_effort: Option<f64>,
}

impl ActivityRecord {
    /// Identifier handed to the identity matcher.
    pub fn identifier(&self, field: IdField) -> Option<&str> {
        match field {
            IdField::ActivityId => self.activity_id.as_deref(),
            IdField::Filename => self.filename.as_deref(),
            IdField::Auto => self.activity_id.as_deref().or(self.filename.as_deref()),
        }
    }
}

/// An activity record paired with its identity resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRecord {
    pub record: ActivityRecord,
    pub resolution: Resolution,
}

impl AnnotatedRecord {
    /// Route id for records matched to a non-noise track.
    pub fn route_id(&self) -> Option<u32> {
        self.resolution.route_id()
    }
}

/// Header positions of the columns we read (first occurrence).
#[derive(Debug, Clone, Default)]
struct Columns {
    activity_id: Option<usize>,
    filename: Option<usize>,
    name: Option<usize>,
    date: Option<usize>,
    activity_type: Option<usize>,
    distance: Option<usize>,
    moving_time: Option<usize>,
    speed: Option<usize>,
    elevation_gain: Option<usize>,
    gap: Option<usize>,
    relative_effort: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        Self {
            activity_id: find(COL_ACTIVITY_ID),
            filename: find(COL_FILENAME),
            name: find(COL_NAME),
            date: find(COL_DATE),
            activity_type: find(COL_TYPE),
            distance: find(COL_DISTANCE),
            moving_time: find(COL_MOVING_TIME),
            speed: find(COL_SPEED),
            elevation_gain: find(COL_ELEVATION_GAIN),
            gap: find(COL_GAP),
            relative_effort: find(COL_RELATIVE_EFFORT),
        }
    }
}

/// Read and clean an activity log from `path`.
pub fn read_activity_records(
    path: impl AsRef<Path>,
    filter: &RecordFilter,
) -> Result<Vec<ActivityRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| RouteStatsError::io(path, e))?;
    let records = read_activity_records_from(file, filter)?;
    info!(
        "[ActivityLog] Read {} records from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// Read and clean an activity log from any reader.
///
/// Rows are kept when their activity type matches the filter (if the log
/// has a type column) and both distance and average speed parse as numbers.
/// Invalid UTF-8 is replaced rather than rejected; a row the CSV parser
/// cannot read is dropped. Only I/O errors fail the read.
pub fn read_activity_records_from<R: std::io::Read>(
    reader: R,
    filter: &RecordFilter,
) -> Result<Vec<ActivityRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = StringRecord::from_byte_record_lossy(csv_reader.byte_headers()?.clone());
    let columns = Columns::from_headers(&headers);

    if columns.distance.is_none() || columns.speed.is_none() {
        warn!(
            "[ActivityLog] Missing '{}' or '{}' column, no records will be kept",
            COL_DISTANCE, COL_SPEED
        );
    }

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for row in csv_reader.byte_records() {
        let row = match row {
            Ok(row) => StringRecord::from_byte_record_lossy(row),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!("[ActivityLog] Skipping unreadable row: {}", e);
                dropped += 1;
                continue;
            }
        };
        match clean_row(&row, &columns, filter) {
            Some(record) => records.push(record),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        info!("[ActivityLog] Dropped {} rows during cleaning", dropped);
    }
    Ok(records)
}

fn clean_row(row: &StringRecord, columns: &Columns, filter: &RecordFilter) -> Option<ActivityRecord> {
    if let (Some(wanted), Some(_)) = (&filter.activity_type, columns.activity_type) {
        if text(row, columns.activity_type)? != *wanted {
            return None;
        }
    }

    Some(ActivityRecord {
        activity_id: text(row, columns.activity_id),
        filename: text(row, columns.filename),
        name: text(row, columns.name),
        date: text(row, columns.date),
        distance: number(row, columns.distance)?,
        moving_time: number(row, columns.moving_time),
        average_speed: number(row, columns.speed)?,
        elevation_gain: number(row, columns.elevation_gain),
        grade_adjusted_pace: number(row, columns.gap),
        relative_effort: number(row, columns.relative_effort),
    })
}

fn text(row: &StringRecord, column: Option<usize>) -> Option<String> {
    let value = row.get(column?)?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a numeric cell, accepting thousands separators.
fn number(row: &StringRecord, column: Option<usize>) -> Option<f64> {
    let value = text(row, column)?.replace(',', "");
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}
