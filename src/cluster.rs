//! Density clustering of feature vectors into routes.
//!
//! Vectors are clustered with DBSCAN on plain Euclidean distance over the
//! flattened degree coordinates. With the default `min_samples = 1` every
//! vector is a core point, which makes this single-linkage clustering
//! within `eps`.
//!
//! When the first pass labels too much of the input as noise, a
//! [`RetryPolicy`] re-runs the pass with the next escalated `eps`. The number
//! of retries is bounded by the length of the escalation list and the last
//! pass is accepted whatever its noise ratio.
//!
//! Neighbor search goes through an R-tree over each vector's first
//! (lat, lon) pair: two vectors within `eps` must have their first pairs
//! within `eps` too, so the tree returns a superset that is then confirmed
//! with the full distance.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::{debug, info};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::ClusterConfig;
use crate::error::{Result, RouteStatsError};
use crate::union_find::UnionFind;
use crate::vectorize::FeatureVector;

/// Outcome of clustering for one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterLabel {
    Route(u32),
    Noise,
}

impl ClusterLabel {
    /// Route id, or `None` for noise.
    pub fn route_id(self) -> Option<u32> {
        match self {
            ClusterLabel::Route(id) => Some(id),
            ClusterLabel::Noise => None,
        }
    }

    pub fn is_noise(self) -> bool {
        self == ClusterLabel::Noise
    }

    /// Integer form used in output tables (noise is `-1`).
    pub fn as_i64(self) -> i64 {
        match self {
            ClusterLabel::Route(id) => id as i64,
            ClusterLabel::Noise => -1,
        }
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Immutable track id -> label mapping, in clustering input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterAssignment {
    entries: Vec<(String, ClusterLabel)>,
    index: HashMap<String, usize>,
}

impl ClusterAssignment {
    /// Build from `(track id, label)` pairs. Later duplicates of an id are ignored.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, ClusterLabel)>,
    {
        let mut assignment = Self::default();
        for (id, label) in entries {
            if assignment.index.contains_key(&id) {
                continue;
            }
            assignment.index.insert(id.clone(), assignment.entries.len());
            assignment.entries.push((id, label));
        }
        assignment
    }

    /// Label of a track id (exact key lookup).
    pub fn get(&self, track_id: &str) -> Option<ClusterLabel> {
        self.index.get(track_id).map(|&i| self.entries[i].1)
    }

    /// Entries in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ClusterLabel)> + '_ {
        self.entries.iter().map(|(id, label)| (id.as_str(), *label))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct non-noise labels.
    pub fn n_clusters(&self) -> usize {
        self.groups().len()
    }

    pub fn n_noise(&self) -> usize {
        self.entries.iter().filter(|(_, l)| l.is_noise()).count()
    }

    /// Route id -> member track ids (input order), noise excluded.
    pub fn groups(&self) -> BTreeMap<u32, Vec<String>> {
        self.entries
            .iter()
            .filter_map(|(id, label)| label.route_id().map(|route| (route, id)))
            .fold(BTreeMap::new(), |mut groups, (route, id)| {
                groups.entry(route).or_insert_with(Vec::new).push(id.clone());
                groups
            })
    }
}

/// Bounded escalation of `eps` when a pass is too noisy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retry while the noise ratio is strictly above this.
    /// Default: 0.5
    pub max_noise_ratio: f64,

    /// `eps` for each retry, in order; its length bounds the retries.
    /// Default: [0.02]
    pub escalation: Vec<f64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_noise_ratio: 0.5,
            escalation: vec![0.02],
        }
    }
}

/// Labels from the accepted pass of a [`RetryPolicy`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub labels: Vec<ClusterLabel>,
    pub eps_used: f64,
    pub retries: u32,
    pub first_pass_noise_ratio: f64,
}

impl RetryPolicy {
    /// Stopping predicate: should a pass with this noise ratio be retried?
    pub fn should_retry(&self, noise_ratio: f64) -> bool {
        noise_ratio > self.max_noise_ratio
    }

    /// Run `pass` at `initial_eps`, then at each escalated eps while the
    /// result stays too noisy. The last pass run is always accepted.
    pub fn run<F>(&self, initial_eps: f64, mut pass: F) -> RetryOutcome
    where
        F: FnMut(f64) -> Vec<ClusterLabel>,
    {
        let mut labels = pass(initial_eps);
        let first_pass_noise_ratio = noise_ratio(&labels);
        let mut eps_used = initial_eps;
        let mut retries = 0;

        for &eps in &self.escalation {
            let ratio = noise_ratio(&labels);
            if !self.should_retry(ratio) {
                break;
            }
            info!(
                "[Clusterer] Noise ratio {:.2} at eps={} exceeds {:.2}, retrying with eps={}",
                ratio, eps_used, self.max_noise_ratio, eps
            );
            labels = pass(eps);
            eps_used = eps;
            retries += 1;
        }

        RetryOutcome {
            labels,
            eps_used,
            retries,
            first_pass_noise_ratio,
        }
    }

    /// Escalation must be increasing and start above the base eps.
    pub fn validate(&self, base_eps: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_noise_ratio) {
            return Err(RouteStatsError::config(format!(
                "cluster.retry.max_noise_ratio must be within [0, 1], got {}",
                self.max_noise_ratio
            )));
        }
        let mut previous = base_eps;
        for &eps in &self.escalation {
            if !(eps.is_finite() && eps > previous) {
                return Err(RouteStatsError::config(format!(
                    "cluster.retry.escalation must increase above eps={}, got {}",
                    previous, eps
                )));
            }
            previous = eps;
        }
        Ok(())
    }
}

/// Fraction of labels that are noise (0 for no labels).
pub fn noise_ratio(labels: &[ClusterLabel]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    labels.iter().filter(|l| l.is_noise()).count() as f64 / labels.len() as f64
}

/// Result of clustering a batch of vectors.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub assignment: ClusterAssignment,
    /// `eps` of the accepted pass
    pub eps_used: f64,
    pub retries: u32,
    pub first_pass_noise_ratio: f64,
}

impl ClusterOutcome {
    pub fn retried(&self) -> bool {
        self.retries > 0
    }
}

/// Cluster vectors with the configured eps, escalating per the retry policy.
///
/// All vectors must have the same dimension.
pub fn cluster_with_retry(vectors: &[FeatureVector], config: &ClusterConfig) -> ClusterOutcome {
    let outcome = config
        .retry
        .run(config.eps, |eps| dbscan(vectors, eps, config.min_samples));

    let assignment = ClusterAssignment::new(
        vectors
            .iter()
            .map(|v| v.track_id.clone())
            .zip(outcome.labels),
    );

    info!(
        "[Clusterer] Found {} clusters, {} noise points (eps={}, {} retries)",
        assignment.n_clusters(),
        assignment.n_noise(),
        outcome.eps_used,
        outcome.retries
    );

    ClusterOutcome {
        assignment,
        eps_used: outcome.eps_used,
        retries: outcome.retries,
        first_pass_noise_ratio: outcome.first_pass_noise_ratio,
    }
}

/// DBSCAN over feature vectors.
///
/// A vector is a core point when at least `min_samples` vectors (itself
/// included) lie within `eps`. Core points within `eps` of each other share
/// a label; a non-core point takes the label of the earliest-labelled core
/// point in its neighborhood, or is noise if it has none. Labels are numbered
/// in order of each cluster's lowest-index core point, so the output depends
/// only on the input order.
pub fn dbscan(vectors: &[FeatureVector], eps: f64, min_samples: usize) -> Vec<ClusterLabel> {
    let neighborhoods = neighborhoods(vectors, eps);
    let is_core: Vec<bool> = neighborhoods
        .iter()
        .map(|n| n.len() >= min_samples)
        .collect();

    let mut uf = UnionFind::new(vectors.len());
    for (i, neighbors) in neighborhoods.iter().enumerate() {
        if !is_core[i] {
            continue;
        }
        for &j in neighbors {
            if j > i && is_core[j] {
                uf.union(i, j);
            }
        }
    }

    let core_ids = uf.component_ids((0..vectors.len()).filter(|&i| is_core[i]));

    neighborhoods
        .iter()
        .enumerate()
        .map(|(i, neighbors)| {
            let id = core_ids[i].or_else(|| neighbors.iter().filter_map(|&j| core_ids[j]).min());
            id.map(ClusterLabel::Route).unwrap_or(ClusterLabel::Noise)
        })
        .collect()
}

type HeadPoint = GeomWithData<[f64; 2], usize>;

/// Indices within `eps` of each vector (itself included), sorted ascending.
fn neighborhoods(vectors: &[FeatureVector], eps: f64) -> Vec<Vec<usize>> {
    let eps_sq = eps * eps;
    let tree: RTree<HeadPoint> = RTree::bulk_load(
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| HeadPoint::new(v.head(), i))
            .collect(),
    );

    let neighbors_of = |i: usize| -> Vec<usize> {
        let v = &vectors[i];
        let mut neighbors: Vec<usize> = tree
            .locate_within_distance(v.head(), eps_sq)
            .map(|candidate| candidate.data)
            .filter(|&j| v.distance_squared(&vectors[j]) <= eps_sq)
            .collect();
        neighbors.sort_unstable();
        neighbors
    };

    #[cfg(feature = "parallel")]
    let result: Vec<Vec<usize>> = (0..vectors.len()).into_par_iter().map(neighbors_of).collect();

    #[cfg(not(feature = "parallel"))]
    let result: Vec<Vec<usize>> = (0..vectors.len()).map(neighbors_of).collect();

    debug!(
        "[Clusterer] eps={}: {} neighbor links across {} vectors",
        eps,
        result.iter().map(|n| n.len().saturating_sub(1)).sum::<usize>(),
        vectors.len()
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(id: &str, values: &[f64]) -> FeatureVector {
        FeatureVector {
            track_id: id.to_string(),
            values: values.to_vec(),
        }
    }

    /// Vectors spaced `step` apart along the first latitude component.
    fn spaced(count: usize, step: f64) -> Vec<FeatureVector> {
        (0..count)
            .map(|i| {
                let lat = 40.0 + i as f64 * step;
                vector(&format!("{}.gpx", i), &[lat, -3.0, lat, -3.1])
            })
            .collect()
    }

    #[test]
    fn test_single_linkage_chain() {
        // ~0.014 apart: each within eps of the next only
        let vectors = spaced(4, 0.01);
        let labels = dbscan(&vectors, 0.015, 1);
        assert!(labels.iter().all(|l| *l == ClusterLabel::Route(0)));
    }

    #[test]
    fn test_min_samples_one_never_noise() {
        let vectors = spaced(5, 1.0);
        let labels = dbscan(&vectors, 0.015, 1);
        assert_eq!(
            labels,
            (0..5).map(ClusterLabel::Route).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_labels_in_input_order() {
        let vectors = vec![
            vector("far", &[10.0, 10.0]),
            vector("a1", &[0.0, 0.0]),
            vector("far2", &[10.0, 10.005]),
            vector("a2", &[0.0, 0.001]),
        ];
        let labels = dbscan(&vectors, 0.015, 1);
        assert_eq!(
            labels,
            vec![
                ClusterLabel::Route(0),
                ClusterLabel::Route(1),
                ClusterLabel::Route(0),
                ClusterLabel::Route(1),
            ]
        );
    }

    #[test]
    fn test_border_and_noise_points() {
        // 0,1,2 dense; 3 within eps of 2 only; 4 isolated
        let vectors = vec![
            vector("0", &[0.0, 0.0]),
            vector("1", &[0.0, 0.01]),
            vector("2", &[0.0, 0.02]),
            vector("3", &[0.0, 0.032]),
            vector("4", &[5.0, 5.0]),
        ];
        let labels = dbscan(&vectors, 0.015, 3);
        assert_eq!(labels[0], ClusterLabel::Route(0));
        assert_eq!(labels[1], ClusterLabel::Route(0));
        assert_eq!(labels[2], ClusterLabel::Route(0));
        // 3 has only itself and 2 as neighbors: border point
        assert_eq!(labels[3], ClusterLabel::Route(0));
        assert_eq!(labels[4], ClusterLabel::Noise);
    }

    #[test]
    fn test_within_eps_share_label() {
        let vectors = vec![
            vector("a", &[1.0, 1.0, 1.0, 1.0]),
            vector("b", &[1.005, 1.0, 1.0, 1.005]),
            vector("c", &[3.0, 3.0, 3.0, 3.0]),
            vector("d", &[1.0, 1.01, 1.0, 1.0]),
        ];
        let labels = dbscan(&vectors, 0.015, 1);
        for i in 0..vectors.len() {
            for j in 0..vectors.len() {
                if vectors[i].distance(&vectors[j]) <= 0.015 {
                    assert_eq!(labels[i], labels[j], "{} and {}", i, j);
                }
            }
        }
        assert_ne!(labels[0], labels[2]);
    }

    /// Deterministic pseudo-random sequence in [0, 1).
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    /// Five jittered chains of tracks far apart, plus stragglers, shuffled.
    fn shuffled_fixture() -> Vec<FeatureVector> {
        let mut rng = Lcg(42);
        let mut vectors = Vec::new();
        for c in 0..5 {
            let base_lat = 40.0 + c as f64;
            for k in 0..6 {
                let lat = base_lat + k as f64 * 0.004 + rng.next() * 0.002;
                let lon = -3.0 + rng.next() * 0.002;
                vectors.push(vector(&format!("{}-{}.gpx", c, k), &[lat, lon, lat + 0.01, lon]));
            }
            // Just past the end of the chain, close to the last member only
            let lat = base_lat + 5.0 * 0.004 + 0.012 + rng.next() * 0.001;
            vectors.push(vector(&format!("{}-tail.gpx", c), &[lat, -3.0, lat + 0.01, -3.0]));
        }
        for k in 0..3 {
            let lat = 60.0 + k as f64;
            vectors.push(vector(&format!("lone-{}.gpx", k), &[lat, 10.0, lat, 10.0]));
        }

        for i in (1..vectors.len()).rev() {
            let j = (rng.next() * (i + 1) as f64) as usize;
            vectors.swap(i, j.min(i));
        }
        vectors
    }

    /// All-pairs DBSCAN: clusters numbered by their lowest-index core point,
    /// border points take the smallest neighboring cluster.
    fn all_pairs_labels(vectors: &[FeatureVector], eps: f64, min_samples: usize) -> Vec<ClusterLabel> {
        let n = vectors.len();
        let within = |i: usize, j: usize| vectors[i].distance_squared(&vectors[j]) <= eps * eps;
        let core: Vec<bool> = (0..n)
            .map(|i| (0..n).filter(|&j| within(i, j)).count() >= min_samples)
            .collect();

        let mut labels: Vec<Option<u32>> = vec![None; n];
        let mut next = 0;
        for start in 0..n {
            if !core[start] || labels[start].is_some() {
                continue;
            }
            labels[start] = Some(next);
            let mut stack = vec![start];
            while let Some(i) = stack.pop() {
                for j in 0..n {
                    if core[j] && labels[j].is_none() && within(i, j) {
                        labels[j] = Some(next);
                        stack.push(j);
                    }
                }
            }
            next += 1;
        }

        (0..n)
            .map(|i| {
                let id = if core[i] {
                    labels[i]
                } else {
                    (0..n)
                        .filter(|&j| core[j] && within(i, j))
                        .filter_map(|j| labels[j])
                        .min()
                };
                id.map(ClusterLabel::Route).unwrap_or(ClusterLabel::Noise)
            })
            .collect()
    }

    #[test]
    fn test_matches_all_pairs_labelling() {
        let vectors = shuffled_fixture();
        for min_samples in [1, 2, 3] {
            let labels = dbscan(&vectors, 0.015, min_samples);
            assert_eq!(
                labels,
                all_pairs_labels(&vectors, 0.015, min_samples),
                "min_samples={}",
                min_samples
            );
            assert_eq!(labels, dbscan(&vectors, 0.015, min_samples));
        }

        let single_linkage = dbscan(&vectors, 0.015, 1);
        let clusters: std::collections::HashSet<_> = single_linkage.iter().collect();
        assert!(clusters.len() >= 8);
    }

    #[test]
    fn test_retry_policy_retries_once() {
        let policy = RetryPolicy::default();
        let mut calls = Vec::new();
        let outcome = policy.run(0.015, |eps| {
            calls.push(eps);
            vec![ClusterLabel::Noise, ClusterLabel::Noise, ClusterLabel::Route(0)]
        });
        // Second pass is just as noisy but is accepted anyway
        assert_eq!(calls, vec![0.015, 0.02]);
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.eps_used, 0.02);
        assert!((outcome.first_pass_noise_ratio - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_retry_policy_skips_when_quiet() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let outcome = policy.run(0.015, |_| {
            calls += 1;
            // exactly half noise is not above the threshold
            vec![ClusterLabel::Noise, ClusterLabel::Route(0)]
        });
        assert_eq!(calls, 1);
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.eps_used, 0.015);
    }

    #[test]
    fn test_retry_policy_multiple_steps_stop_early() {
        let policy = RetryPolicy {
            max_noise_ratio: 0.5,
            escalation: vec![0.02, 0.03, 0.04],
        };
        let outcome = policy.run(0.01, |eps| {
            if eps < 0.025 {
                vec![ClusterLabel::Noise; 4]
            } else {
                vec![ClusterLabel::Route(0); 4]
            }
        });
        assert_eq!(outcome.retries, 2);
        assert_eq!(outcome.eps_used, 0.03);
    }

    #[test]
    fn test_cluster_with_retry_escalates() {
        // 0.012 per component -> 0.017 apart: isolated at 0.015, chained at 0.02
        let vectors = spaced(4, 0.012);
        let config = ClusterConfig {
            min_samples: 2,
            ..ClusterConfig::default()
        };
        let outcome = cluster_with_retry(&vectors, &config);
        assert!(outcome.retried());
        assert_eq!(outcome.first_pass_noise_ratio, 1.0);
        assert_eq!(outcome.eps_used, 0.02);
        assert_eq!(outcome.assignment.n_clusters(), 1);
        assert_eq!(outcome.assignment.n_noise(), 0);
    }

    #[test]
    fn test_cluster_with_retry_accepts_noisy_retry() {
        let vectors = spaced(3, 1.0);
        let config = ClusterConfig {
            min_samples: 2,
            ..ClusterConfig::default()
        };
        let outcome = cluster_with_retry(&vectors, &config);
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.assignment.n_noise(), 3);
        assert_eq!(outcome.assignment.n_clusters(), 0);
    }

    #[test]
    fn test_assignment_groups() {
        let assignment = ClusterAssignment::new(vec![
            ("b.gpx".to_string(), ClusterLabel::Route(1)),
            ("a.gpx".to_string(), ClusterLabel::Route(0)),
            ("n.gpx".to_string(), ClusterLabel::Noise),
            ("c.gpx".to_string(), ClusterLabel::Route(1)),
        ]);
        let groups = assignment.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&0], vec!["a.gpx".to_string()]);
        assert_eq!(groups[&1], vec!["b.gpx".to_string(), "c.gpx".to_string()]);
        assert_eq!(assignment.n_noise(), 1);
        assert_eq!(assignment.get("n.gpx"), Some(ClusterLabel::Noise));
        assert_eq!(assignment.get("missing.gpx"), None);
    }

    #[test]
    fn test_label_display() {
        assert_eq!(ClusterLabel::Route(7).to_string(), "7");
        assert_eq!(ClusterLabel::Noise.to_string(), "-1");
        assert_eq!(noise_ratio(&[]), 0.0);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate(0.015).is_ok());
        assert!(RetryPolicy::default().validate(0.02).is_err());
        let no_retry = RetryPolicy {
            max_noise_ratio: 0.5,
            escalation: vec![],
        };
        assert!(no_retry.validate(0.015).is_ok());
    }
}
