//! Route centroids.
//!
//! A route's centroid is the mean of every recorded point of every member
//! track, so longer recordings weigh more than short ones. This is the
//! centroid `geo` computes for a `MultiPoint`.

use std::collections::{BTreeMap, HashMap};

use geo::{Centroid, MultiPoint, Point};
use log::debug;

use crate::{GpsPoint, Track};

/// Compute the point-weighted centroid of each route.
///
/// `groups` maps route id to member track ids (see
/// [`crate::ClusterAssignment::groups`]). Members missing from `tracks`
/// contribute nothing; a route left with no points is omitted.
pub fn resolve_centroids(
    groups: &BTreeMap<u32, Vec<String>>,
    tracks: &[Track],
) -> BTreeMap<u32, GpsPoint> {
    let by_id: HashMap<&str, &Track> = tracks.iter().map(|t| (t.id.as_str(), t)).collect();

    groups
        .iter()
        .filter_map(|(&route, members)| {
            let points: MultiPoint<f64> = members
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .flat_map(|track| track.points.iter())
                .map(|p| Point::new(p.longitude, p.latitude))
                .collect();

            match points.centroid() {
                Some(c) => Some((route, GpsPoint::new(c.y(), c.x()))),
                None => {
                    debug!("[Centroids] Route {} has no resolvable points", route);
                    None
                }
            }
        })
        .collect()
}

/// Google Maps link for a point, as printed in the route locations report.
pub fn maps_url(point: &GpsPoint) -> String {
    format!(
        "https://maps.google.com/?q={},{}",
        point.latitude, point.longitude
    )
}
