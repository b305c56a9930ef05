//! Unified error handling for the route-stats library.
//!
//! Per-item failures (one track file, one activity record, one geocoder
//! lookup) are handled where they occur and never abort a run. Only the
//! variants that describe whole-batch problems reach the caller of
//! [`crate::pipeline::run_pipeline`].

use thiserror::Error;

/// Unified error type for route-stats operations.
#[derive(Debug, Error)]
pub enum RouteStatsError {
    /// Track has too few points to resample
    #[error("Track '{track_id}' has {point_count} points, minimum {minimum_required} required")]
    InsufficientPoints {
        track_id: String,
        point_count: usize,
        minimum_required: usize,
    },

    /// A single track file could not be parsed
    #[error("Failed to parse '{file}': {message}")]
    ParseFailure { file: String, message: String },

    /// Nothing left to cluster
    #[error("No usable input: {message}")]
    EmptyInput { message: String },

    /// Filesystem error on a path the run depends on
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Activity log or output table error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// HTTP/geocoder error
    #[error("HTTP error{}: {message}", status_suffix(.status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RouteStatsError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        RouteStatsError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        RouteStatsError::Config {
            message: message.into(),
        }
    }

    pub fn empty_input(message: impl Into<String>) -> Self {
        RouteStatsError::EmptyInput {
            message: message.into(),
        }
    }
}

fn status_suffix(status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!(" ({})", code),
        None => String::new(),
    }
}

/// Result type alias for route-stats operations.
pub type Result<T> = std::result::Result<T, RouteStatsError>;

/// Extension trait for converting Option to RouteStatsError.
pub trait OptionExt<T> {
    /// Convert Option to Result with insufficient points error.
    fn ok_or_insufficient_points(
        self,
        track_id: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_points(
        self,
        track_id: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T> {
        self.ok_or_else(|| RouteStatsError::InsufficientPoints {
            track_id: track_id.to_string(),
            point_count,
            minimum_required: minimum,
        })
    }
}
