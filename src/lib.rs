//! # Route Stats
//!
//! Identify repeated routes in a folder of GPS tracks and compute per-route
//! performance statistics from an activity log.
//!
//! This library provides:
//! - GPX loading that skips unparsable files instead of failing
//! - Index-based resampling of tracks into fixed-length feature vectors
//! - Density clustering (DBSCAN) of those vectors with a bounded retry policy
//! - Point-weighted centroids per route, with optional reverse geocoding
//! - Fuzzy reconciliation of activity-log identifiers with track filenames
//! - Per-route pace, elevation and effort aggregates
//!
//! ## Features
//!
//! - **`parallel`** - Parallel file parsing and neighbor search with rayon (default)
//! - **`http`** - Reverse geocoding of route centroids over HTTP
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_stats::{GpsPoint, Track};
//! use route_stats::cluster::cluster_with_retry;
//! use route_stats::config::ClusterConfig;
//! use route_stats::vectorize::vectorize_tracks;
//!
//! let monday: Vec<GpsPoint> = (0..20)
//!     .map(|i| GpsPoint::new(51.50 + i as f64 * 0.0005, -0.12))
//!     .collect();
//! let thursday = monday.clone();
//!
//! let tracks = vec![Track::new("a.gpx", monday), Track::new("b.gpx", thursday)];
//! let (vectors, _degenerate) = vectorize_tracks(&tracks, 100);
//! let outcome = cluster_with_retry(&vectors, &ClusterConfig::default());
//!
//! assert_eq!(outcome.assignment.n_clusters(), 1);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, RouteStatsError};

// Run configuration (JSON file + defaults)
pub mod config;
pub use config::PipelineConfig;

// GPX directory loading
pub mod loader;
pub use loader::{load_tracks, LoadReport};

// Resampling and flattening into feature vectors
pub mod vectorize;
pub use vectorize::{resample, vectorize, vectorize_tracks, FeatureVector};

// Disjoint-set forest used to link density-reachable vectors
pub mod union_find;
pub use union_find::UnionFind;

// Density clustering with bounded retry
pub mod cluster;
pub use cluster::{cluster_with_retry, ClusterAssignment, ClusterLabel, ClusterOutcome, RetryPolicy};

// Point-weighted route centroids
pub mod centroid;
pub use centroid::resolve_centroids;

// Identifier reconciliation between activity log and track files
pub mod matcher;
pub use matcher::{annotate_records, IdentityMatcher, MatchReport, MatchStrategy, Resolution};

// Activity log ingestion
pub mod records;
pub use records::{read_activity_records, ActivityRecord, AnnotatedRecord};

// Per-route aggregates
pub mod stats;
pub use stats::{compute_route_stats, RouteStats};

// Centroid -> place name lookup
pub mod geocode;
pub use geocode::{OfflineGeocoder, ReverseGeocoder, UNKNOWN_LOCATION};

// Output tables, reports and the run summary
pub mod report;
pub use report::{RouteLocation, RunSummary};

// End-to-end orchestration
pub mod pipeline;
pub use pipeline::{run_pipeline, ActivityResults, PipelineInput, PipelineOutput};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_stats::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One recorded outing, keyed by the file it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Source file name (no directory), e.g. `"8083971283.gpx"`
    pub id: String,
    /// Points in recording order
    pub points: Vec<GpsPoint>,
}

impl Track {
    pub fn new(id: impl Into<String>, points: Vec<GpsPoint>) -> Self {
        Self {
            id: id.into(),
            points,
        }
    }

    /// Tracks with fewer than two points cannot be resampled.
    pub fn is_degenerate(&self) -> bool {
        self.points.len() < vectorize::MIN_TRACK_POINTS
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_track() {
        assert!(Track::new("empty.gpx", vec![]).is_degenerate());
        assert!(Track::new("one.gpx", vec![GpsPoint::new(1.0, 1.0)]).is_degenerate());
        assert!(!Track::new(
            "two.gpx",
            vec![GpsPoint::new(1.0, 1.0), GpsPoint::new(1.1, 1.0)]
        )
        .is_degenerate());
    }
}
