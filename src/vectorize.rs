//! Track vectorization.
//!
//! Tracks of any length are reduced to `n` points picked at evenly spaced
//! *indices* (not distance or time), then flattened to
//! `[lat0, lon0, lat1, lon1, ...]` so they can be compared as points in
//! Euclidean space.

use log::{debug, info};

use crate::error::{OptionExt, Result};
use crate::{GpsPoint, Track};

/// Fewest points a track needs to be resampled.
pub const MIN_TRACK_POINTS: usize = 2;

/// Flattened resampled track, tagged with the track it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub track_id: String,
    pub values: Vec<f64>,
}

impl FeatureVector {
    /// Number of components (`2 × n_points`).
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// First (lat, lon) pair, used as a spatial index key.
    pub fn head(&self) -> [f64; 2] {
        match self.values.as_slice() {
            [lat, lon, ..] => [*lat, *lon],
            _ => [0.0, 0.0],
        }
    }

    /// Squared Euclidean distance to another vector of the same dimension.
    pub fn distance_squared(&self, other: &FeatureVector) -> f64 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    pub fn distance(&self, other: &FeatureVector) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// Pick `n` points at evenly spaced indices from first to last, inclusive.
///
/// Each target position `i * (len - 1) / (n - 1)` is rounded to the nearest
/// index, so indices repeat when `n` exceeds the number of points. The first
/// and last points are always kept when `n >= 2`.
///
/// Fails with `InsufficientPoints` for tracks under two points; callers are
/// expected to filter those out first.
pub fn resample(points: &[GpsPoint], n: usize) -> Result<Vec<GpsPoint>> {
    resample_named("<unnamed>", points, n)
}

/// [`resample`] for a whole track, reporting the track id on failure.
pub fn resample_track(track: &Track, n: usize) -> Result<Vec<GpsPoint>> {
    resample_named(&track.id, &track.points, n)
}

fn resample_named(id: &str, points: &[GpsPoint], n: usize) -> Result<Vec<GpsPoint>> {
    let last = (points.len() >= MIN_TRACK_POINTS)
        .then(|| points.len() - 1)
        .ok_or_insufficient_points(id, points.len(), MIN_TRACK_POINTS)?;

    let resampled = match n {
        0 => Vec::new(),
        1 => vec![points[0]],
        _ => (0..n)
            .map(|i| {
                let pos = i as f64 * last as f64 / (n - 1) as f64;
                points[(pos.round() as usize).min(last)]
            })
            .collect(),
    };
    Ok(resampled)
}

/// Flatten points into `[lat0, lon0, lat1, lon1, ...]`.
pub fn vectorize(points: &[GpsPoint]) -> Vec<f64> {
    points
        .iter()
        .flat_map(|p| [p.latitude, p.longitude])
        .collect()
}

/// Resample and flatten every non-degenerate track.
///
/// Returns the vectors in track order and the number of tracks dropped for
/// having fewer than [`MIN_TRACK_POINTS`] points.
pub fn vectorize_tracks(tracks: &[Track], n_points: usize) -> (Vec<FeatureVector>, usize) {
    let mut vectors = Vec::with_capacity(tracks.len());
    let mut degenerate = 0;

    for track in tracks {
        if track.is_degenerate() {
            debug!(
                "[Vectorizer] Dropping {} ({} points)",
                track.id,
                track.points.len()
            );
            degenerate += 1;
            continue;
        }
        // Degenerate tracks were filtered above, so resample cannot fail here
        if let Ok(resampled) = resample_track(track, n_points) {
            vectors.push(FeatureVector {
                track_id: track.id.clone(),
                values: vectorize(&resampled),
            });
        }
    }

    info!(
        "[Vectorizer] Vectorized {} tracks to {} points ({} degenerate)",
        vectors.len(),
        n_points,
        degenerate
    );

    (vectors, degenerate)
}
