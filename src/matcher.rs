//! Identity matching between activity records and track files.
//!
//! The activity log and the track folder do not agree on one naming
//! scheme: a record may carry `8083971283`, `8083971283.gpx` or
//! `activities/8083971283.gpx` for the file `8083971283.gpx`. Each
//! [`MatchStrategy`] is a pure lookup from a trimmed identifier into the
//! [`ClusterAssignment`]; [`IdentityMatcher::resolve`] tries them in
//! precedence order and stops at the first hit.
//!
//! The substring strategy returns the first key, in assignment order, that
//! contains the identifier. That order is the order tracks were clustered
//! in, which is not a stable notion of "best" match; when several keys
//! qualify the ambiguity is logged rather than resolved.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info, warn};
use serde::Serialize;

use crate::cluster::{ClusterAssignment, ClusterLabel};
use crate::config::IdField;
use crate::records::{ActivityRecord, AnnotatedRecord};

/// One way of turning an identifier into an assignment key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Identifier is a key as-is
    Exact,
    /// Identifier plus the configured extension is a key
    WithExtension,
    /// Identifier with any directory prefix removed is a key
    Basename,
    /// Identifier occurs inside a key
    Substring,
}

impl MatchStrategy {
    /// Strategies in precedence order, most precise first.
    pub const PRECEDENCE: [MatchStrategy; 4] = [
        MatchStrategy::Exact,
        MatchStrategy::WithExtension,
        MatchStrategy::Basename,
        MatchStrategy::Substring,
    ];

    /// Try this strategy alone.
    pub fn apply(
        self,
        key: &str,
        assignment: &ClusterAssignment,
        extension: &str,
    ) -> Option<ClusterLabel> {
        match self {
            MatchStrategy::Exact => assignment.get(key),
            MatchStrategy::WithExtension => assignment.get(&format!("{}{}", key, extension)),
            MatchStrategy::Basename => assignment.get(basename(key)),
            MatchStrategy::Substring => substring_match(key, assignment),
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::WithExtension => "with_extension",
            MatchStrategy::Basename => "basename",
            MatchStrategy::Substring => "substring",
        };
        f.write_str(name)
    }
}

/// Outcome of resolving one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Matched {
        label: ClusterLabel,
        strategy: MatchStrategy,
    },
    Unresolved,
}

impl Resolution {
    pub fn label(&self) -> Option<ClusterLabel> {
        match self {
            Resolution::Matched { label, .. } => Some(*label),
            Resolution::Unresolved => None,
        }
    }

    /// Route id for matched, non-noise records.
    pub fn route_id(&self) -> Option<u32> {
        self.label().and_then(ClusterLabel::route_id)
    }
}

/// Resolves record identifiers against a cluster assignment.
#[derive(Debug, Clone)]
pub struct IdentityMatcher<'a> {
    assignment: &'a ClusterAssignment,
    extension: String,
}

impl<'a> IdentityMatcher<'a> {
    pub fn new(assignment: &'a ClusterAssignment, extension: impl Into<String>) -> Self {
        Self {
            assignment,
            extension: extension.into(),
        }
    }

    /// Resolve an identifier, trying each strategy in precedence order.
    ///
    /// Missing and blank identifiers are unresolved without trying any
    /// strategy (a blank string would otherwise be a substring of every key).
    pub fn resolve(&self, identifier: Option<&str>) -> Resolution {
        let key = match identifier.map(str::trim) {
            Some(key) if !key.is_empty() => key,
            _ => return Resolution::Unresolved,
        };

        for strategy in MatchStrategy::PRECEDENCE {
            if let Some(label) = strategy.apply(key, self.assignment, &self.extension) {
                debug!(
                    "[IdentityMatcher] '{}' -> route {} ({})",
                    key, label, strategy
                );
                return Resolution::Matched { label, strategy };
            }
        }

        Resolution::Unresolved
    }
}

/// Resolve every record's identifier and tally the outcome.
///
/// Records are moved into the result unchanged; only the resolution is added.
pub fn annotate_records(
    records: Vec<ActivityRecord>,
    matcher: &IdentityMatcher<'_>,
    id_field: IdField,
) -> (Vec<AnnotatedRecord>, MatchReport) {
    let annotated: Vec<AnnotatedRecord> = records
        .into_iter()
        .map(|record| {
            let resolution = matcher.resolve(record.identifier(id_field));
            AnnotatedRecord { record, resolution }
        })
        .collect();

    let report: MatchReport = annotated.iter().map(|a| &a.resolution).collect();
    info!(
        "[IdentityMatcher] Matched {} of {} records ({} unresolved, {} on noise tracks)",
        report.matched, report.total, report.unresolved, report.on_noise
    );

    (annotated, report)
}

/// Per-strategy tally of a batch of resolutions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchReport {
    pub total: usize,
    pub matched: usize,
    pub unresolved: usize,
    /// Matched, but to a noise-labelled track
    pub on_noise: usize,
    pub by_strategy: BTreeMap<MatchStrategy, usize>,
}

impl MatchReport {
    pub fn record(&mut self, resolution: &Resolution) {
        self.total += 1;
        match resolution {
            Resolution::Matched { label, strategy } => {
                self.matched += 1;
                if label.is_noise() {
                    self.on_noise += 1;
                }
                *self.by_strategy.entry(*strategy).or_insert(0) += 1;
            }
            Resolution::Unresolved => self.unresolved += 1,
        }
    }
}

impl<'r> FromIterator<&'r Resolution> for MatchReport {
    fn from_iter<I: IntoIterator<Item = &'r Resolution>>(iter: I) -> Self {
        let mut report = MatchReport::default();
        for resolution in iter {
            report.record(resolution);
        }
        report
    }
}

/// Path-stripped form of an identifier (either separator).
fn basename(key: &str) -> &str {
    key.rsplit(['/', '\\']).next().unwrap_or(key)
}

fn substring_match(key: &str, assignment: &ClusterAssignment) -> Option<ClusterLabel> {
    let mut hits = assignment.iter().filter(|(id, _)| id.contains(key));
    let (first_id, label) = hits.next()?;

    let others = hits.count();
    if others > 0 {
        warn!(
            "[IdentityMatcher] '{}' is a substring of {} track names, using first: {}",
            key,
            others + 1,
            first_id
        );
    }

    Some(label)
}
