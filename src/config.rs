//! Pipeline configuration.
//!
//! Every section has a `Default` carrying the tuned constants, so a JSON
//! config file only needs the values it changes:
//!
//! ```rust
//! use route_stats::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{ "cluster": { "eps": 0.02 } }"#).unwrap();
//! assert_eq!(config.cluster.eps, 0.02);
//! assert_eq!(config.vectorize.n_points, 100);
//! ```

use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::cluster::RetryPolicy;
use crate::error::{Result, RouteStatsError};

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub vectorize: VectorizeConfig,
    pub cluster: ClusterConfig,
    pub matcher: MatcherConfig,
    pub records: RecordFilter,
    pub geocode: GeocodeConfig,
}

/// Resampling settings for the track vectorizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeConfig {
    /// Number of points each track is resampled to.
    /// Default: 100
    pub n_points: usize,
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        Self { n_points: 100 }
    }
}

/// Density clustering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Neighborhood radius, in raw degrees over the flattened vector.
    /// Default: 0.015
    pub eps: f64,

    /// Neighborhood size (including the point itself) needed to found a cluster.
    /// Default: 1 (single-linkage within eps)
    pub min_samples: usize,

    /// Escalation applied when the first pass is too noisy.
    pub retry: RetryPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            eps: 0.015,
            min_samples: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClusterConfig {
    /// Replace `eps`, dropping escalation steps that no longer exceed it.
    ///
    /// Used for command-line overrides, where the escalation list cannot be
    /// edited alongside `eps`.
    pub fn override_eps(&mut self, eps: f64) {
        self.eps = eps;
        let before = self.retry.escalation.len();
        self.retry.escalation.retain(|&step| step > eps);
        let dropped = before - self.retry.escalation.len();
        if dropped > 0 {
            warn!(
                "[Config] eps={} is not below {} retry step(s); retries now use {:?}",
                eps, dropped, self.retry.escalation
            );
        }
    }
}

/// Which activity record field feeds the identity matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IdField {
    /// Activity ID when present, otherwise the filename
    #[default]
    Auto,
    ActivityId,
    Filename,
}

/// Identity matcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Suffix appended by the second matching strategy.
    /// Default: ".gpx"
    pub extension: String,
    pub id_field: IdField,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            extension: ".gpx".to_string(),
            id_field: IdField::Auto,
        }
    }
}

/// Row filter applied while reading the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFilter {
    /// Keep only rows of this activity type (ignored when the log has no type column).
    /// Default: "Run"
    pub activity_type: Option<String>,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            activity_type: Some("Run".to_string()),
        }
    }
}

/// Reverse geocoding settings for route centroids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub enabled: bool,
    /// Nominatim-compatible reverse endpoint
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Minimum spacing between requests (public Nominatim allows 1 req/s)
    pub min_interval_ms: u64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://nominatim.openstreetmap.org/reverse".to_string(),
            user_agent: concat!("route-stats/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 10,
            min_interval_ms: 1_000,
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON config, filling unspecified values with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| RouteStatsError::config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RouteStatsError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.vectorize.n_points < 2 {
            return Err(RouteStatsError::config(format!(
                "vectorize.n_points must be at least 2, got {}",
                self.vectorize.n_points
            )));
        }
        if !(self.cluster.eps.is_finite() && self.cluster.eps > 0.0) {
            return Err(RouteStatsError::config(format!(
                "cluster.eps must be a positive number, got {}",
                self.cluster.eps
            )));
        }
        if self.cluster.min_samples == 0 {
            return Err(RouteStatsError::config("cluster.min_samples must be at least 1"));
        }
        self.cluster.retry.validate(self.cluster.eps)?;
        if self.matcher.extension.trim().is_empty() {
            return Err(RouteStatsError::config("matcher.extension must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.vectorize.n_points, 100);
        assert_eq!(config.cluster.eps, 0.015);
        assert_eq!(config.cluster.min_samples, 1);
        assert_eq!(config.cluster.retry.escalation, vec![0.02]);
        assert_eq!(config.cluster.retry.max_noise_ratio, 0.5);
        assert_eq!(config.matcher.extension, ".gpx");
        assert_eq!(config.records.activity_type.as_deref(), Some("Run"));
        assert!(!config.geocode.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "cluster": { "min_samples": 2 }, "matcher": { "id_field": "filename" } }"#,
        )
        .unwrap();
        assert_eq!(config.cluster.min_samples, 2);
        assert_eq!(config.cluster.eps, 0.015);
        assert_eq!(config.matcher.id_field, IdField::Filename);
        assert_eq!(config.matcher.extension, ".gpx");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.cluster.eps = 0.0;
        assert!(matches!(config.validate(), Err(RouteStatsError::Config { .. })));

        let mut config = PipelineConfig::default();
        config.vectorize.n_points = 1;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.cluster.min_samples = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.cluster.retry.escalation = vec![0.01];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_override_eps_above_escalation() {
        let mut config = PipelineConfig::default();
        config.cluster.override_eps(0.03);
        assert_eq!(config.cluster.eps, 0.03);
        assert!(config.cluster.retry.escalation.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_override_eps_keeps_larger_steps() {
        let mut config = PipelineConfig::default();
        config.cluster.retry.escalation = vec![0.02, 0.04];
        config.cluster.override_eps(0.025);
        assert_eq!(config.cluster.retry.escalation, vec![0.04]);
        assert!(config.validate().is_ok());

        config.cluster.override_eps(0.01);
        assert_eq!(config.cluster.retry.escalation, vec![0.04]);
    }

    #[test]
    fn test_invalid_json() {
        let err = PipelineConfig::from_json_str("{ not json").unwrap_err();
        assert!(err.to_string().contains("invalid config JSON"));
    }
}
