//! GPX directory loading.
//!
//! Reads every `.gpx` file directly inside a directory and turns it into a
//! [`Track`]. A file that cannot be read or parsed is logged and recorded in
//! [`LoadReport::skipped`]; only an unreadable directory fails the load.
//!
//! With the `parallel` feature files are parsed on the rayon pool. Results
//! are collected back in file-name order and merged by a single writer, so
//! the report is identical either way.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Result, RouteStatsError};
use crate::{GpsPoint, Track};

/// A file the loader gave up on.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Outcome of loading a track directory.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Parsed tracks in file-name order
    pub tracks: Vec<Track>,
    /// Files that failed to parse
    pub skipped: Vec<SkippedFile>,
}

impl LoadReport {
    /// Number of candidate files seen (loaded + skipped).
    pub fn files_seen(&self) -> usize {
        self.tracks.len() + self.skipped.len()
    }
}

/// Load all GPX tracks in `dir` (not recursive).
///
/// Files are matched on a case-insensitive `gpx` extension. Invalid UTF-8 is
/// replaced before parsing rather than rejecting the file.
pub fn load_tracks(dir: impl AsRef<Path>) -> Result<LoadReport> {
    let dir = dir.as_ref();
    let paths = list_gpx_files(dir)?;

    #[cfg(feature = "parallel")]
    let parsed: Vec<(String, Result<Track>)> = paths
        .par_iter()
        .map(|path| (file_name(path), parse_track_file(path)))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let parsed: Vec<(String, Result<Track>)> = paths
        .iter()
        .map(|path| (file_name(path), parse_track_file(path)))
        .collect();

    let mut report = LoadReport::default();
    for (file, result) in parsed {
        match result {
            Ok(track) => report.tracks.push(track),
            Err(e) => {
                warn!("[TrackLoader] Skipping {}: {}", file, e);
                report.skipped.push(SkippedFile {
                    file,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "[TrackLoader] Loaded {} GPX files from {} ({} skipped)",
        report.tracks.len(),
        dir.display(),
        report.skipped.len()
    );

    Ok(report)
}

/// Parse GPX text into a track named `id`.
///
/// Points come from the first track only, with all of its segments
/// concatenated. A document without tracks yields an empty point list.
pub fn parse_gpx(id: &str, content: &str) -> Result<Track> {
    let gpx = gpx::read(Cursor::new(content.as_bytes())).map_err(|e| {
        RouteStatsError::ParseFailure {
            file: id.to_string(),
            message: e.to_string(),
        }
    })?;

    let points: Vec<GpsPoint> = gpx
        .tracks
        .first()
        .map(|track| {
            track
                .segments
                .iter()
                .flat_map(|segment| segment.points.iter())
                .map(|wpt| {
                    let p = wpt.point();
                    GpsPoint::new(p.y(), p.x())
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Track::new(id, points))
}

fn parse_track_file(path: &Path) -> Result<Track> {
    let bytes = std::fs::read(path).map_err(|e| RouteStatsError::io(path, e))?;
    let content = String::from_utf8_lossy(&bytes);
    parse_gpx(&file_name(path), &content)
}

fn list_gpx_files(dir: &Path) -> Result<Vec<PathBuf>> {
    // read_dir up front so a missing directory is reported as such
    std::fs::read_dir(dir).map_err(|e| RouteStatsError::io(dir, e))?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[TrackLoader] Unreadable directory entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && has_gpx_extension(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

fn has_gpx_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gpx"))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
