//! End-to-end run: tracks in, routes and per-route statistics out.
//!
//! Stages run strictly in order (load, vectorize, cluster, locate, then
//! optionally read and annotate the activity log and aggregate it). Each
//! stage only reads what earlier stages produced.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::centroid::resolve_centroids;
use crate::cluster::{cluster_with_retry, ClusterOutcome};
use crate::config::PipelineConfig;
use crate::error::{Result, RouteStatsError};
use crate::geocode::ReverseGeocoder;
use crate::loader::{load_tracks, SkippedFile};
use crate::matcher::{annotate_records, IdentityMatcher, MatchReport};
use crate::records::{read_activity_records, AnnotatedRecord};
use crate::report::{self, RouteLocation, RunSummary};
use crate::stats::{compute_route_stats, RouteStats};
use crate::vectorize::vectorize_tracks;

/// Where a run reads from.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    /// Directory holding the `.gpx` files
    pub tracks_dir: PathBuf,
    /// Activity log; without it the run stops after locating routes
    pub activities: Option<PathBuf>,
}

impl PipelineInput {
    pub fn new(tracks_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracks_dir: tracks_dir.into(),
            activities: None,
        }
    }

    pub fn with_activities(mut self, path: impl Into<PathBuf>) -> Self {
        self.activities = Some(path.into());
        self
    }
}

/// Activity log results of a run.
#[derive(Debug, Clone)]
pub struct ActivityResults {
    /// Cleaned records in log order, each with its resolution
    pub annotated: Vec<AnnotatedRecord>,
    pub match_report: MatchReport,
    /// One row per route with at least one matched record, by route id
    pub stats: Vec<RouteStats>,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub skipped: Vec<SkippedFile>,
    pub clusters: ClusterOutcome,
    /// By route id
    pub locations: Vec<RouteLocation>,
    pub activities: Option<ActivityResults>,
    pub summary: RunSummary,
}

impl PipelineOutput {
    /// Write every output file into `out_dir`, creating it if needed.
    ///
    /// Returns the paths written.
    pub fn write_to(&self, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir).map_err(|e| RouteStatsError::io(out_dir, e))?;

        let mut written = Vec::new();

        let path = out_dir.join(report::LOCATIONS_FILE);
        report::write_route_locations(&path, &self.locations)?;
        written.push(path);

        if let Some(activities) = &self.activities {
            let path = out_dir.join(report::ROUTE_STATS_FILE);
            report::write_route_stats_csv(&path, &activities.stats)?;
            written.push(path);

            let path = out_dir.join(report::ANNOTATED_FILE);
            report::write_annotated_csv(&path, &activities.annotated)?;
            written.push(path);
        }

        let path = out_dir.join(report::SUMMARY_FILE);
        report::write_summary_json(&path, &self.summary)?;
        written.push(path);

        info!(
            "[Pipeline] Wrote {} files to {}",
            written.len(),
            out_dir.display()
        );
        Ok(written)
    }
}

/// Run every stage on `input`.
///
/// Fails on an unreadable track directory or activity log, and with
/// [`RouteStatsError::EmptyInput`] when no track survives loading and
/// vectorization. Unparsable files, degenerate tracks, unmatched records
/// and geocoder failures are counted, never fatal.
pub fn run_pipeline(
    input: &PipelineInput,
    config: &PipelineConfig,
    geocoder: &dyn ReverseGeocoder,
) -> Result<PipelineOutput> {
    config.validate()?;

    let loaded = load_tracks(&input.tracks_dir)?;
    if loaded.tracks.is_empty() {
        return Err(RouteStatsError::empty_input(format!(
            "no parsable GPX files in {} ({} skipped)",
            input.tracks_dir.display(),
            loaded.skipped.len()
        )));
    }

    let (vectors, degenerate) = vectorize_tracks(&loaded.tracks, config.vectorize.n_points);
    if vectors.is_empty() {
        return Err(RouteStatsError::empty_input(format!(
            "all {} tracks have fewer than two points",
            loaded.tracks.len()
        )));
    }

    let clusters = cluster_with_retry(&vectors, &config.cluster);
    if clusters.retried() {
        info!(
            "[Pipeline] Noise ratio {:.2} on first pass, accepted eps={}",
            clusters.first_pass_noise_ratio, clusters.eps_used
        );
    }

    let groups = clusters.assignment.groups();
    let centroids = resolve_centroids(&groups, &loaded.tracks);
    let locations: Vec<RouteLocation> = centroids
        .into_iter()
        .map(|(route_id, centroid)| RouteLocation {
            route_id,
            centroid,
            name: geocoder.place_name(&centroid),
            n_tracks: groups.get(&route_id).map_or(0, Vec::len),
        })
        .collect();

    let activities = match &input.activities {
        Some(path) => {
            let records = read_activity_records(path, &config.records)?;
            let matcher = IdentityMatcher::new(&clusters.assignment, config.matcher.extension.clone());
            let (annotated, match_report) =
                annotate_records(records, &matcher, config.matcher.id_field);
            if match_report.total > 0 && match_report.matched == 0 {
                warn!(
                    "[Pipeline] No activity matched a track file; check that '{:?}' identifiers correspond to GPX file names",
                    config.matcher.id_field
                );
            }
            let stats = compute_route_stats(&annotated);
            Some(ActivityResults {
                annotated,
                match_report,
                stats,
            })
        }
        None => None,
    };

    let mut summary = RunSummary {
        files_seen: loaded.files_seen(),
        tracks_loaded: loaded.tracks.len(),
        files_skipped: loaded.skipped.len(),
        tracks_vectorized: vectors.len(),
        degenerate_tracks: degenerate,
        eps_used: clusters.eps_used,
        retried: clusters.retried(),
        clusters: clusters.assignment.n_clusters(),
        noise_tracks: clusters.assignment.n_noise(),
        ..RunSummary::default()
    };
    if let Some(a) = &activities {
        summary.records_read = a.match_report.total;
        summary.records_matched = a.match_report.matched;
        summary.records_unresolved = a.match_report.unresolved;
        summary.records_on_noise = a.match_report.on_noise;
        summary.routes_with_stats = a.stats.len();
    }

    info!(
        "[Pipeline] {} routes from {} tracks, {} routes with statistics",
        summary.clusters, summary.tracks_vectorized, summary.routes_with_stats
    );

    Ok(PipelineOutput {
        skipped: loaded.skipped,
        clusters,
        locations,
        activities,
        summary,
    })
}
