//! End-to-end pipeline tests.
//!
//! Builds a small track folder and activity log in a temp dir, runs the
//! whole pipeline and checks the written outputs.
//!
//! Run with: `cargo test --test pipeline`

use std::fs;
use std::path::Path;

use route_stats::config::IdField;
use route_stats::report::{ANNOTATED_FILE, LOCATIONS_FILE, ROUTE_STATS_FILE, SUMMARY_FILE};
use route_stats::{
    run_pipeline, ClusterLabel, OfflineGeocoder, PipelineConfig, PipelineInput, RouteStatsError,
};
use tempfile::TempDir;

fn gpx(points: &[(f64, f64)]) -> String {
    let trkpts: String = points
        .iter()
        .map(|(lat, lon)| format!("      <trkpt lat=\"{:.6}\" lon=\"{:.6}\"></trkpt>\n", lat, lon))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <gpx version=\"1.1\" creator=\"route-stats tests\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n\
         <trk><name>run</name><trkseg>\n{}</trkseg></trk>\n</gpx>\n",
        trkpts
    )
}

/// Square loop of 40 points starting at its south-west corner.
fn square_loop(lat: f64, lon: f64, side: f64) -> Vec<(f64, f64)> {
    let per_side = 10;
    let step = side / per_side as f64;
    let mut points = Vec::with_capacity(per_side * 4);
    for i in 0..per_side {
        points.push((lat + i as f64 * step, lon));
    }
    for i in 0..per_side {
        points.push((lat + side, lon + i as f64 * step));
    }
    for i in 0..per_side {
        points.push((lat + side - i as f64 * step, lon + side));
    }
    for i in 0..per_side {
        points.push((lat, lon + side - i as f64 * step));
    }
    points
}

fn triangle(lat: f64, lon: f64) -> Vec<(f64, f64)> {
    (0..30)
        .map(|i| {
            let t = i as f64 / 30.0;
            (lat + 0.01 * t, lon + 0.02 * (t * 3.0).fract())
        })
        .collect()
}

const ACTIVITIES: &str = "\
Activity ID,Activity Date,Activity Name,Activity Type,Distance,Filename,Moving Time,Distance,Average Speed,Elevation Gain,Average Grade Adjusted Pace,Relative Effort
1001,\"Mar 1, 2024\",Park loop,Run,4.4,activities/1001.gpx,1500,4400,3.0,20,3.1,15
1002,\"Mar 3, 2024\",Park loop again,Run,4.5,activities/1002.gpx,1600,4500,2.8,22,2.9,18
2001,\"Mar 4, 2024\",Hill reps,Run,6.0,activities/2001.gpx,2600,6000,2.5,180,2.9,60
9999,\"Mar 5, 2024\",No GPS,Run,5.0,,1800,5000,2.7,,,
1001,\"Mar 6, 2024\",Bike to work,Ride,9.0,activities/1001.gpx,1200,9000,7.5,40,,12
";

/// Two overlapping park loops, one distant hill route, one broken file.
fn write_fixture(dir: &Path) {
    // ~80 m offset: far below the default eps once resampled
    fs::write(dir.join("1001.gpx"), gpx(&square_loop(46.0, 7.0, 0.01))).unwrap();
    fs::write(dir.join("1002.gpx"), gpx(&square_loop(46.0007, 7.0, 0.01))).unwrap();
    fs::write(dir.join("2001.gpx"), gpx(&triangle(47.0, 8.0))).unwrap();
    fs::write(dir.join("3001.gpx"), "this is not xml").unwrap();
    fs::write(dir.join("notes.txt"), "ignored").unwrap();
}

#[test]
fn test_full_run() {
    let tracks = TempDir::new().unwrap();
    write_fixture(tracks.path());
    let log = tracks.path().join("activities.csv");
    fs::write(&log, ACTIVITIES).unwrap();

    let input = PipelineInput::new(tracks.path()).with_activities(&log);
    let output = run_pipeline(&input, &PipelineConfig::default(), &OfflineGeocoder).unwrap();

    // Clustering
    let assignment = &output.clusters.assignment;
    assert_eq!(assignment.n_clusters(), 2);
    assert_eq!(assignment.n_noise(), 0);
    assert_eq!(assignment.get("1001.gpx"), Some(ClusterLabel::Route(0)));
    assert_eq!(assignment.get("1002.gpx"), Some(ClusterLabel::Route(0)));
    assert_eq!(assignment.get("2001.gpx"), Some(ClusterLabel::Route(1)));
    assert!(!output.clusters.retried());

    assert_eq!(output.skipped.len(), 1);
    assert_eq!(output.skipped[0].file, "3001.gpx");

    // Locations: the park centroid lies inside the loop
    assert_eq!(output.locations.len(), 2);
    let park = &output.locations[0];
    assert_eq!(park.n_tracks, 2);
    assert!(park.centroid.latitude > 46.0 && park.centroid.latitude < 46.011);
    assert!(park.centroid.longitude > 7.0 && park.centroid.longitude < 7.01);

    // Activity log: the ride is filtered out, 9999 has no track
    let activities = output.activities.as_ref().unwrap();
    assert_eq!(activities.match_report.total, 4);
    assert_eq!(activities.match_report.matched, 3);
    assert_eq!(activities.match_report.unresolved, 1);
    assert_eq!(activities.match_report.on_noise, 0);

    let stats = &activities.stats;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].route_id, 0);
    assert_eq!(stats[0].distance_count, 2);
    assert_eq!(stats[1].route_id, 1);
    assert_eq!(stats[1].distance_count, 1);
    assert_eq!(stats[1].pace_std, None);
    // 60 / (3.0 * 2.237) = 8.94, 60 / (2.8 * 2.237) = 9.58
    let pace = stats[0].pace_mean.unwrap();
    assert!((pace - (8.94 + 9.58) / 2.0).abs() < 1e-9);
    assert_eq!(stats[1].elevation_gain_mean, Some(180.0));

    // Summary
    let summary = &output.summary;
    assert_eq!(summary.files_seen, 4);
    assert_eq!(summary.tracks_loaded, 3);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.tracks_vectorized, 3);
    assert_eq!(summary.clusters, 2);
    assert_eq!(summary.records_read, 4);
    assert_eq!(summary.records_matched, 3);
    assert_eq!(summary.routes_with_stats, 2);
}

#[test]
fn test_outputs_written() {
    let tracks = TempDir::new().unwrap();
    write_fixture(tracks.path());
    let log = tracks.path().join("activities.csv");
    fs::write(&log, ACTIVITIES).unwrap();

    let input = PipelineInput::new(tracks.path()).with_activities(&log);
    let output = run_pipeline(&input, &PipelineConfig::default(), &OfflineGeocoder).unwrap();

    let out = TempDir::new().unwrap();
    let written = output.write_to(out.path()).unwrap();
    assert_eq!(written.len(), 4);

    let stats_csv = fs::read_to_string(out.path().join(ROUTE_STATS_FILE)).unwrap();
    let mut lines = stats_csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "RouteID,Pace_min_per_mile_mean,Pace_min_per_mile_median,Pace_min_per_mile_std,\
         Average Grade Adjusted Pace_mean,Elevation Gain_mean,Relative Effort_mean,\
         Distance_mean,Distance_count"
    );
    assert_eq!(lines.count(), 2);

    let mut annotated = csv::Reader::from_path(out.path().join(ANNOTATED_FILE)).unwrap();
    let route_col = annotated
        .headers()
        .unwrap()
        .iter()
        .position(|h| h == "GPS_RouteID")
        .unwrap();
    let routes: Vec<String> = annotated
        .records()
        .map(|r| r.unwrap()[route_col].to_string())
        .collect();
    assert_eq!(routes, vec!["0", "0", "1", ""]);

    let locations = fs::read_to_string(out.path().join(LOCATIONS_FILE)).unwrap();
    assert!(locations.contains("Route   0 → Unknown location"));
    assert!(locations.contains("Route 1: Unknown location"));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary["clusters"], 2);
    assert_eq!(summary["records_unresolved"], 1);
}

#[test]
fn test_filename_identifiers() {
    let tracks = TempDir::new().unwrap();
    write_fixture(tracks.path());
    let log = tracks.path().join("activities.csv");
    fs::write(&log, ACTIVITIES).unwrap();

    let mut config = PipelineConfig::default();
    config.matcher.id_field = IdField::Filename;

    let input = PipelineInput::new(tracks.path()).with_activities(&log);
    let output = run_pipeline(&input, &config, &OfflineGeocoder).unwrap();

    // "activities/1001.gpx" etc. resolve by basename; 9999 has no filename
    let report = &output.activities.as_ref().unwrap().match_report;
    assert_eq!(report.matched, 3);
    assert_eq!(report.unresolved, 1);
}

#[test]
fn test_strict_eps_leaves_noise() {
    let tracks = TempDir::new().unwrap();
    write_fixture(tracks.path());

    let mut config = PipelineConfig::default();
    config.cluster.eps = 0.001;
    config.cluster.min_samples = 2;
    config.cluster.retry.escalation = vec![0.002];

    let output = run_pipeline(&PipelineInput::new(tracks.path()), &config, &OfflineGeocoder).unwrap();

    // Nothing has a second neighbor this close; the retry runs once and is accepted
    assert!(output.clusters.retried());
    assert_eq!(output.clusters.eps_used, 0.002);
    assert_eq!(output.summary.noise_tracks, 3);
    assert!(output.locations.is_empty());
}

#[test]
fn test_missing_directory() {
    let err = run_pipeline(
        &PipelineInput::new("/definitely/not/a/real/dir"),
        &PipelineConfig::default(),
        &OfflineGeocoder,
    )
    .unwrap_err();
    assert!(matches!(err, RouteStatsError::Io { .. }));
}

#[test]
fn test_no_gpx_files() {
    let tracks = TempDir::new().unwrap();
    fs::write(tracks.path().join("readme.md"), "no tracks here").unwrap();

    let err = run_pipeline(
        &PipelineInput::new(tracks.path()),
        &PipelineConfig::default(),
        &OfflineGeocoder,
    )
    .unwrap_err();
    assert!(matches!(err, RouteStatsError::EmptyInput { .. }));
}

#[test]
fn test_deterministic_across_runs() {
    let tracks = TempDir::new().unwrap();
    write_fixture(tracks.path());
    let input = PipelineInput::new(tracks.path());

    let first = run_pipeline(&input, &PipelineConfig::default(), &OfflineGeocoder).unwrap();
    let second = run_pipeline(&input, &PipelineConfig::default(), &OfflineGeocoder).unwrap();

    let a: Vec<(String, ClusterLabel)> = first
        .clusters
        .assignment
        .iter()
        .map(|(id, l)| (id.to_string(), l))
        .collect();
    let b: Vec<(String, ClusterLabel)> = second
        .clusters
        .assignment
        .iter()
        .map(|(id, l)| (id.to_string(), l))
        .collect();
    assert_eq!(a, b);
    assert_eq!(first.locations, second.locations);
}
