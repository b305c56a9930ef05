use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, ValueHint};
use log::{error, info, warn};

use route_stats::config::IdField;
use route_stats::stats::{fastest_routes, hardest_routes, most_consistent_routes, RouteStats};
use route_stats::{
    run_pipeline, OfflineGeocoder, PipelineConfig, PipelineInput, ReverseGeocoder, Result,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Find repeated routes in GPX tracks and summarise performance per route",
    long_about = None
)]
struct Cli {
    /// Directory of .gpx files
    #[arg(long, value_hint = ValueHint::DirPath)]
    tracks: PathBuf,

    /// Strava-style activities.csv to attach statistics from
    #[arg(long, value_hint = ValueHint::FilePath)]
    activities: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "out", value_hint = ValueHint::DirPath)]
    out: PathBuf,

    /// JSON run configuration (unset values use defaults)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Neighborhood radius for clustering
    #[arg(long)]
    eps: Option<f64>,

    /// Minimum neighborhood size for a core track
    #[arg(long)]
    min_samples: Option<usize>,

    /// Points each track is resampled to
    #[arg(long)]
    points: Option<usize>,

    /// Which activity log column identifies the track file
    #[arg(long, value_enum)]
    id_field: Option<IdField>,

    /// Look up place names for route centroids (needs the `http` feature)
    #[arg(long, action = ArgAction::SetTrue)]
    geocode: bool,

    /// Routes listed per ranking
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Debug logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let geocoder = make_geocoder(&config);

    let mut input = PipelineInput::new(&cli.tracks);
    if let Some(path) = &cli.activities {
        input = input.with_activities(path);
    }

    let output = run_pipeline(&input, &config, geocoder.as_ref())?;
    output.write_to(&cli.out)?;

    println!();
    for loc in &output.locations {
        println!(
            "Route {:3} → {} ({:.4}, {:.4}), {} tracks",
            loc.route_id, loc.name, loc.centroid.latitude, loc.centroid.longitude, loc.n_tracks
        );
    }

    if let Some(activities) = &output.activities {
        if activities.stats.is_empty() {
            warn!("No clustered activities to analyze; check identifier matching");
        } else {
            print_ranking(
                "Fastest routes (pace, min/mile)",
                &fastest_routes(&activities.stats, cli.top),
                |s| s.pace_mean,
            );
            print_ranking(
                "Hardest routes (elevation gain)",
                &hardest_routes(&activities.stats, cli.top),
                |s| s.elevation_gain_mean,
            );
            print_ranking(
                "Most consistent routes (pace std)",
                &most_consistent_routes(&activities.stats, cli.top),
                |s| s.pace_std,
            );
        }
    }

    println!("\n{}", output.summary);
    Ok(())
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            PipelineConfig::from_json_file(path)?
        }
        None => PipelineConfig::default(),
    };

    if let Some(eps) = cli.eps {
        config.cluster.override_eps(eps);
    }
    if let Some(min_samples) = cli.min_samples {
        config.cluster.min_samples = min_samples;
    }
    if let Some(points) = cli.points {
        config.vectorize.n_points = points;
    }
    if let Some(id_field) = cli.id_field {
        config.matcher.id_field = id_field;
    }
    if cli.geocode {
        config.geocode.enabled = true;
    }
    Ok(config)
}

#[cfg(feature = "http")]
fn make_geocoder(config: &PipelineConfig) -> Box<dyn ReverseGeocoder> {
    if !config.geocode.enabled {
        return Box::new(OfflineGeocoder);
    }
    match route_stats::geocode::NominatimGeocoder::new(&config.geocode) {
        Ok(geocoder) => Box::new(geocoder),
        Err(e) => {
            warn!("Geocoding disabled: {}", e);
            Box::new(OfflineGeocoder)
        }
    }
}

#[cfg(not(feature = "http"))]
fn make_geocoder(config: &PipelineConfig) -> Box<dyn ReverseGeocoder> {
    if config.geocode.enabled {
        warn!("Geocoding requested but this build lacks the `http` feature");
    }
    Box::new(OfflineGeocoder)
}

fn print_ranking<F>(title: &str, rows: &[&RouteStats], metric: F)
where
    F: Fn(&RouteStats) -> Option<f64>,
{
    println!("\n{}", title);
    for (rank, row) in rows.iter().enumerate() {
        let value = metric(*row).map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));
        println!(
            "  {}. Route {} : {} ({} runs)",
            rank + 1,
            row.route_id,
            value,
            row.distance_count
        );
    }
}
